use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Json, Path, Query, State};
use axum::headers::authorization::Bearer;
use axum::headers::Authorization;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Router, TypedHeader};
use axum_macros::debug_handler;
use clap::Parser;
use env_logger::{Builder, WriteStyle};
use log::{debug, LevelFilter};
use tokio::task::JoinHandle;

use crate::api::*;
use crate::db::SQLite;
use crate::marketplace::Marketplace;

pub mod api;
pub mod client;
pub mod db;
pub mod marketplace;
pub mod odds;

async fn caller(
    market: &Marketplace,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> Result<UserId, MarketError> {
    let TypedHeader(auth) = bearer.ok_or(MarketError::Unauthorized)?;
    market.authenticate(auth.token()).await
}

#[debug_handler]
async fn register(
    State(market): State<Arc<Marketplace>>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), (StatusCode, Json<ErrorBody>)> {
    let user_id = market.register(request).await.map_err(error_reply)?;
    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id })))
}
async fn login(
    State(market): State<Arc<Marketplace>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, Json<ErrorBody>)> {
    let token = market.login(request).await.map_err(error_reply)?;
    Ok(Json(LoginResponse { token }))
}
async fn me(
    State(market): State<Arc<Marketplace>>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> Result<Json<MeResponse>, (StatusCode, Json<ErrorBody>)> {
    let user = caller(&market, bearer).await.map_err(error_reply)?;
    let me = market.me(user).await.map_err(error_reply)?;
    Ok(Json(me))
}

#[debug_handler]
async fn place_stake(
    State(market): State<Arc<Marketplace>>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    Json(request): Json<PlaceStakeRequest>,
) -> Result<(StatusCode, Json<StakeView>), (StatusCode, Json<ErrorBody>)> {
    let user = caller(&market, bearer).await.map_err(error_reply)?;
    let stake = market
        .place_stake(user, request)
        .await
        .map_err(error_reply)?;
    Ok((StatusCode::CREATED, Json(stake)))
}
async fn boost_stake(
    State(market): State<Arc<Marketplace>>,
    Path(stake): Path<StakeId>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> Result<Json<BoostResponse>, (StatusCode, Json<ErrorBody>)> {
    let user = caller(&market, bearer).await.map_err(error_reply)?;
    let boosted = market.boost(user, stake).await.map_err(error_reply)?;
    Ok(Json(boosted))
}
async fn my_bets(
    State(market): State<Arc<Marketplace>>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> Result<Json<Vec<StakeView>>, (StatusCode, Json<ErrorBody>)> {
    let user = caller(&market, bearer).await.map_err(error_reply)?;
    let bets = market.my_bets(user).await.map_err(error_reply)?;
    Ok(Json(bets))
}

async fn get_listings(
    State(market): State<Arc<Marketplace>>,
    Query(query): Query<ListingsQuery>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> Result<Json<Vec<ListingView>>, (StatusCode, Json<ErrorBody>)> {
    // browsing works logged out; row ids start at 1 so nothing is ever
    // flagged as owned by viewer 0
    let viewer = match bearer {
        Some(TypedHeader(auth)) => market
            .authenticate(auth.token())
            .await
            .map_err(error_reply)?,
        None => 0,
    };
    let listings = market.listings(viewer, query).await.map_err(error_reply)?;
    Ok(Json(listings))
}
async fn create_listing(
    State(market): State<Arc<Marketplace>>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    Json(request): Json<CreateListingRequest>,
) -> Result<(StatusCode, Json<ListingView>), (StatusCode, Json<ErrorBody>)> {
    let user = caller(&market, bearer).await.map_err(error_reply)?;
    let listing = market
        .create_listing(user, request)
        .await
        .map_err(error_reply)?;
    Ok((StatusCode::CREATED, Json(listing)))
}
async fn buy_listing(
    State(market): State<Arc<Marketplace>>,
    Path(listing): Path<ListingId>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> Result<Json<BuyResponse>, (StatusCode, Json<ErrorBody>)> {
    let user = caller(&market, bearer).await.map_err(error_reply)?;
    let bought = market.buy_listing(user, listing).await.map_err(error_reply)?;
    Ok(Json(bought))
}
async fn cancel_listing(
    State(market): State<Arc<Marketplace>>,
    Path(listing): Path<ListingId>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> Result<(), (StatusCode, Json<ErrorBody>)> {
    let user = caller(&market, bearer).await.map_err(error_reply)?;
    market
        .cancel_listing(user, listing)
        .await
        .map_err(error_reply)?;
    Ok(())
}

async fn adjust(
    State(market): State<Arc<Marketplace>>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    Json(request): Json<AdjustRequest>,
) -> Result<Json<MeResponse>, (StatusCode, Json<ErrorBody>)> {
    let actor = caller(&market, bearer).await.map_err(error_reply)?;
    let adjusted = market.adjust(actor, request).await.map_err(error_reply)?;
    Ok(Json(adjusted))
}

#[derive(Parser)]
struct Args {
    #[arg(short, long)]
    admin: Vec<String>,
    #[arg(short, long, default_value_t = 8081)]
    port: u16,
    #[arg(short, long)]
    db: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    Builder::default()
        .filter_level(LevelFilter::Debug)
        .write_style(WriteStyle::Always)
        .init();
    let cli = Args::parse();
    let (_port, handle) = run_server(Some(cli.port), cli.admin, cli.db).await;
    handle.await?;
    Ok(())
}

async fn run_server(
    port: Option<u16>,
    admins: Vec<String>,
    db_conn: Option<String>,
) -> (u16, JoinHandle<()>) {
    let state = Arc::new(Marketplace::new(
        Box::new(SQLite::new(db_conn).await),
        admins,
    ));
    let app = Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/api/me", get(me))
        .route("/api/stakes", post(place_stake))
        .route("/api/stakes/:stake/boost", post(boost_stake))
        .route("/api/trade/my-bets", get(my_bets))
        .route("/api/trade/listings", get(get_listings).post(create_listing))
        .route("/api/trade/listings/:listing/buy", post(buy_listing))
        .route("/api/trade/listings/:listing/cancel", post(cancel_listing))
        .route("/api/admin/adjust", post(adjust))
        .with_state(state);

    let addr = "127.0.0.1:".to_string() + port.unwrap_or(0).to_string().as_str();
    let server = axum::Server::bind(&addr.parse().unwrap()).serve(app.into_make_service());
    let port = server.local_addr().port();
    debug!("Listening on {}", server.local_addr());
    let handle = tokio::spawn(async move {
        server.await.unwrap();
    });
    (port, handle)
}

#[cfg(test)]
mod test {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::client::Client;

    async fn server(admins: Vec<&str>) -> Client {
        let admins = admins.into_iter().map(String::from).collect();
        let (port, _) = run_server(None, admins, None).await;
        Client::new("http://127.0.0.1:".to_string() + port.to_string().as_str())
    }
    async fn signup(client: &Client, name: &str) -> String {
        let response = client
            .register(RegisterRequest {
                username: name.to_string(),
                password: "password123".to_string(),
            })
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        client
            .login(LoginRequest {
                username: name.to_string(),
                password: "password123".to_string(),
            })
            .await
            .unwrap()
            .token
    }
    fn rain(days: i64, amount: Decimal) -> PlaceStakeRequest {
        PlaceStakeRequest {
            city: None,
            target_date: Utc::now().date_naive() + Duration::days(days),
            target_time: None,
            side: Side::Rain,
            amount,
        }
    }

    #[tokio::test]
    async fn the_full_trading_loop() {
        let client = server(vec!["admin"]).await;
        let admin = signup(&client, "admin").await;
        let alice = signup(&client, "alice").await;
        let bob = signup(&client, "bob").await;
        let alice_id = client.me(&alice).await.unwrap().user_id;
        let bob_id = client.me(&bob).await.unwrap().user_id;

        // bring the fresh accounts to 100 and 50 points
        for (user_id, delta) in [(alice_id, dec!(-400)), (bob_id, dec!(-450))] {
            let response = client
                .adjust(
                    AdjustRequest {
                        user_id,
                        points: Some(delta),
                        bolts: None,
                    },
                    &admin,
                )
                .await;
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(client.me(&alice).await.unwrap().balance, dec!(100));
        assert_eq!(client.me(&bob).await.unwrap().balance, dec!(50));

        let response = client.place_stake(rain(7, dec!(10)), &alice).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let stake = response.json::<StakeView>().await.unwrap();
        assert_eq!(stake.base_odds, dec!(1.5));
        assert_eq!(stake.potential_gain, dec!(15.00));
        assert_eq!(client.me(&alice).await.unwrap().balance, dec!(90));

        let response = client
            .create_listing(
                CreateListingRequest {
                    stake_id: stake.id,
                    ask_price: Some(dec!(12)),
                },
                &alice,
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let listing = response.json::<ListingView>().await.unwrap();
        assert!(listing.is_mine);

        let book = client
            .listings(ListingsQuery::default(), Some(&bob))
            .await
            .unwrap();
        assert_eq!(book.len(), 1);
        assert_eq!(book[0].ask_price, dec!(12));
        assert_eq!(book[0].potential_gain, dec!(15.00));
        assert!(!book[0].is_mine);

        let response = client.buy_listing(listing.id, &bob).await;
        assert_eq!(response.status(), StatusCode::OK);
        let bought = response.json::<BuyResponse>().await.unwrap();
        assert_eq!(bought.balance, dec!(38));
        assert_eq!(client.me(&alice).await.unwrap().balance, dec!(102));

        let bets = client.my_bets(&bob).await.unwrap();
        assert_eq!(bets.len(), 1);
        assert_eq!(bets[0].id, stake.id);
        assert!(client.my_bets(&alice).await.unwrap().is_empty());

        // the sold listing is settled for good
        let response = client.cancel_listing(listing.id, &alice).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            response.json::<ErrorBody>().await.unwrap().error,
            "not_active"
        );
        let response = client.buy_listing(listing.id, &bob).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn browsing_needs_no_login() {
        let client = server(vec![]).await;
        let alice = signup(&client, "alice").await;
        let mut request = rain(10, dec!(25));
        request.city = Some("Lyon".to_string());
        request.side = Side::Sun;
        let response = client.place_stake(request, &alice).await;
        let stake = response.json::<StakeView>().await.unwrap();
        let response = client
            .create_listing(
                CreateListingRequest {
                    stake_id: stake.id,
                    ask_price: None,
                },
                &alice,
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let book = client.listings(ListingsQuery::default(), None).await.unwrap();
        assert_eq!(book.len(), 1);
        assert_eq!(book[0].city, "Lyon");
        assert_eq!(book[0].ask_price, dec!(25));
        assert!(!book[0].is_mine);
        assert!(!book[0].date_label.is_empty());

        // filters travel as query parameters
        let lyon = client
            .listings(
                ListingsQuery {
                    city: Some("lyon".to_string()),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(lyon.len(), 1);
        let paris = client
            .listings(
                ListingsQuery {
                    city: Some("Paris".to_string()),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();
        assert!(paris.is_empty());
        let wrong_day = client
            .listings(
                ListingsQuery {
                    date: Some(stake.target_date + Duration::days(1)),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();
        assert!(wrong_day.is_empty());

        // everything personal stays behind a session
        assert!(client.me("made-up-token").await.is_err());
        let response = client.buy_listing(book[0].id, "made-up-token").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn failures_reply_with_codes_and_floors() {
        let client = server(vec![]).await;
        let alice = signup(&client, "alice").await;

        let response = client
            .register(RegisterRequest {
                username: "alice".to_string(),
                password: "password123".to_string(),
            })
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            response.json::<ErrorBody>().await.unwrap().error,
            "username_taken"
        );

        let response = client.place_stake(rain(2, dec!(5)), &alice).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.json::<ErrorBody>().await.unwrap().error,
            "outside_betting_window"
        );

        let response = client.place_stake(rain(7, dec!(10)), &alice).await;
        let stake = response.json::<StakeView>().await.unwrap();
        let response = client
            .create_listing(
                CreateListingRequest {
                    stake_id: stake.id,
                    ask_price: Some(dec!(9.99)),
                },
                &alice,
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response.json::<ErrorBody>().await.unwrap();
        assert_eq!(body.error, "price_too_low");
        assert_eq!(body.min_price, Some(dec!(10.00)));

        let response = client
            .adjust(
                AdjustRequest {
                    user_id: 1,
                    points: Some(dec!(1)),
                    bolts: None,
                },
                &alice,
            )
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.json::<ErrorBody>().await.unwrap().error, "forbidden");

        let response = client.boost_stake(stake.id, &alice).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.json::<ErrorBody>().await.unwrap().error,
            "insufficient_boosts"
        );
    }
}
