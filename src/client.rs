use anyhow::{bail, Result};
use reqwest::Response;

use crate::api::*;

pub struct Client {
    url: String,
    client: reqwest::Client,
}
impl Client {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::new();
        Self { url, client }
    }
    pub async fn register(&self, request: RegisterRequest) -> Response {
        self.client
            .post(self.url.clone() + "/register")
            .json(&request)
            .send()
            .await
            .unwrap()
    }
    pub async fn login(&self, request: LoginRequest) -> Result<LoginResponse> {
        let response = self
            .client
            .post(self.url.clone() + "/login")
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("{}: {}", response.status(), response.text().await?)
        }
        Ok(response.json::<LoginResponse>().await?)
    }
    pub async fn me(&self, token: &str) -> Result<MeResponse> {
        let response = self
            .client
            .get(self.url.clone() + "/api/me")
            .bearer_auth(token)
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("{}: {}", response.status(), response.text().await?)
        }
        Ok(response.json::<MeResponse>().await?)
    }
    pub async fn place_stake(&self, request: PlaceStakeRequest, token: &str) -> Response {
        self.client
            .post(self.url.clone() + "/api/stakes")
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .unwrap()
    }
    pub async fn boost_stake(&self, stake: StakeId, token: &str) -> Response {
        self.client
            .post(format!("{}/api/stakes/{}/boost", self.url, stake))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
    }
    pub async fn my_bets(&self, token: &str) -> Result<Vec<StakeView>> {
        let response = self
            .client
            .get(self.url.clone() + "/api/trade/my-bets")
            .bearer_auth(token)
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("{}: {}", response.status(), response.text().await?)
        }
        Ok(response.json::<Vec<StakeView>>().await?)
    }
    pub async fn listings(
        &self,
        query: ListingsQuery,
        token: Option<&str>,
    ) -> Result<Vec<ListingView>> {
        let mut request = self
            .client
            .get(self.url.clone() + "/api/trade/listings")
            .query(&query);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            bail!("{}: {}", response.status(), response.text().await?)
        }
        Ok(response.json::<Vec<ListingView>>().await?)
    }
    pub async fn create_listing(&self, request: CreateListingRequest, token: &str) -> Response {
        self.client
            .post(self.url.clone() + "/api/trade/listings")
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .unwrap()
    }
    pub async fn buy_listing(&self, listing: ListingId, token: &str) -> Response {
        self.client
            .post(format!("{}/api/trade/listings/{}/buy", self.url, listing))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
    }
    pub async fn cancel_listing(&self, listing: ListingId, token: &str) -> Response {
        self.client
            .post(format!("{}/api/trade/listings/{}/cancel", self.url, listing))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
    }
    pub async fn adjust(&self, request: AdjustRequest, token: &str) -> Response {
        self.client
            .post(self.url.clone() + "/api/admin/adjust")
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .unwrap()
    }
}
