use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::*;

#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct RegisterResponse {
    pub user_id: UserId,
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct LoginResponse {
    pub token: SessionToken,
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct MeResponse {
    pub user_id: UserId,
    pub username: String,
    pub role: UserRole,
    pub balance: Points,
    pub bolts: i64,
}
/// One of the caller's own open stakes, as returned by the stake and
/// my-bets endpoints.
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct StakeView {
    pub id: StakeId,
    pub city: String,
    pub target_date: NaiveDate,
    pub target_time: Option<String>,
    pub date_label: String,
    pub side: Side,
    pub amount: Points,
    pub base_odds: Decimal,
    pub boosts_count: u32,
    pub boosts_add: Decimal,
    pub total_odds: Decimal,
    pub potential_gain: Points,
    pub status: StakeStatus,
}
/// A stake offered for sale, as returned by the listings endpoints.
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct ListingView {
    pub id: ListingId,
    pub stake_id: StakeId,
    pub seller_id: UserId,
    pub city: String,
    pub target_date: NaiveDate,
    pub target_time: Option<String>,
    pub date_label: String,
    pub side: Side,
    pub amount: Points,
    pub base_odds: Decimal,
    pub boosts_count: u32,
    pub boosts_add: Decimal,
    pub total_odds: Decimal,
    pub potential_gain: Points,
    pub ask_price: Points,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_mine: bool,
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct BoostResponse {
    pub stake_id: StakeId,
    pub boost_count: u32,
    pub boost_add: Decimal,
    pub total_odds: Decimal,
    pub potential_gain: Points,
    pub bolts_left: i64,
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct BuyResponse {
    pub balance: Points,
}
/// Error payload every failing endpoint returns alongside its status code.
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_price: Option<Points>,
}
