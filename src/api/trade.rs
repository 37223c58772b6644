use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub type RowId = i64;
pub type UserId = RowId;
pub type StakeId = RowId;
pub type ListingId = RowId;
/// Point balances, stake amounts and prices. Two decimal places everywhere.
pub type Points = Decimal;
pub type SessionToken = String;

/// The outcome a stake is wagered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Rain,
    Sun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StakeStatus {
    Active,
    Settled,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingStatus {
    Active,
    Sold,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRole {
    User,
    Admin,
}

/// A wager of points on rain or sun for one city and day.
///
/// `total_odds` and `potential_gain` are never stored anywhere; they are
/// recomputed from the stored fields on every read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stake {
    pub id: StakeId,
    pub owner_id: UserId,
    pub city: String,
    pub target_date: NaiveDate,
    pub target_time: Option<String>,
    pub side: Side,
    pub amount: Points,
    pub base_odds: Decimal,
    pub boost_count: u32,
    pub boost_add: Decimal,
    pub status: StakeStatus,
    pub created_at: DateTime<Utc>,
}
impl Stake {
    pub fn total_odds(&self) -> Decimal {
        self.base_odds + self.boost_add
    }
    pub fn potential_gain(&self) -> Points {
        (self.amount * self.total_odds()).round_dp(2)
    }
}

/// A sale offer for one stake. At most one `Active` listing exists
/// per stake at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub stake_id: StakeId,
    pub seller_id: UserId,
    pub ask_price: Points,
    pub status: ListingStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub buyer_id: Option<UserId>,
    pub sale_price: Option<Points>,
}
