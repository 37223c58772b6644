use reqwest::StatusCode;
use thiserror::Error;

use super::Points;

/// Everything that can go wrong on the market, shared by the server and
/// the cli so both speak the same error codes.
#[derive(Error, PartialEq, Debug)]
pub enum MarketError {
    #[error("balance is too low for this operation")]
    InsufficientFunds,
    #[error("no boost bolts left")]
    InsufficientBoosts,
    #[error("only the owner may do this")]
    NotOwner,
    #[error("not active anymore")]
    NotActive,
    #[error("stake is already listed for sale")]
    AlreadyListed,
    #[error("asking price is below the minimum of {min_price} points")]
    PriceTooLow { min_price: Points },
    #[error("buying your own listing is not allowed")]
    SelfTrade,
    #[error("no such record")]
    NotFound,
    #[error("this stake cannot take any more boosts")]
    BoostCapReached,
    #[error("the target day has already passed")]
    StakeExpired,
    #[error("betting is only open between 4 and 31 days ahead")]
    OutsideBettingWindow,
    #[error("you already hold the opposite side for that day")]
    OppositeSideExists,
    #[error("amount must be positive points with at most two decimals")]
    InvalidAmount,
    #[error("odds below 1.0 make no sense")]
    InvalidOdds,
    #[error("username must be 3 to 40 letters, digits, '_' or '-'")]
    InvalidUsername,
    #[error("password must have at least 8 characters")]
    InvalidPassword,
    #[error("username is already taken")]
    UsernameTaken,
    #[error("login required")]
    Unauthorized,
    #[error("admins only")]
    Forbidden,
    #[error("storage error: {0}")]
    Storage(String),
}
impl MarketError {
    /// Stable machine readable code carried in every error body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InsufficientFunds => "insufficient_funds",
            Self::InsufficientBoosts => "insufficient_boosts",
            Self::NotOwner => "not_owner",
            Self::NotActive => "not_active",
            Self::AlreadyListed => "already_listed",
            Self::PriceTooLow { .. } => "price_too_low",
            Self::SelfTrade => "self_trade",
            Self::NotFound => "not_found",
            Self::BoostCapReached => "boost_cap_reached",
            Self::StakeExpired => "stake_expired",
            Self::OutsideBettingWindow => "outside_betting_window",
            Self::OppositeSideExists => "opposite_side_exists",
            Self::InvalidAmount => "invalid_amount",
            Self::InvalidOdds => "invalid_odds",
            Self::InvalidUsername => "invalid_username",
            Self::InvalidPassword => "invalid_password",
            Self::UsernameTaken => "username_taken",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::Storage(_) => "storage",
        }
    }
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::NotOwner | Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotActive
            | Self::AlreadyListed
            | Self::OppositeSideExists
            | Self::UsernameTaken => StatusCode::CONFLICT,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}
