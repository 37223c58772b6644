use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::*;

// Requests
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PlaceStakeRequest {
    pub city: Option<String>,
    pub target_date: NaiveDate,
    pub target_time: Option<String>,
    pub side: Side,
    pub amount: Points,
}
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CreateListingRequest {
    pub stake_id: StakeId,
    /// Defaults to the staked amount, which is also the floor.
    pub ask_price: Option<Points>,
}
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ListingsQuery {
    pub city: Option<String>,
    pub side: Option<Side>,
    pub date: Option<NaiveDate>,
}
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AdjustRequest {
    pub user_id: UserId,
    /// Signed: positive credits, negative debits.
    pub points: Option<Points>,
    /// Signed: positive grants bolts, negative removes them.
    pub bolts: Option<i64>,
}
