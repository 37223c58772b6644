use axum::Json;
use log::debug;
use reqwest::StatusCode;

use super::{ErrorBody, MarketError};

/// Turns a market error into the HTTP reply every handler returns on failure.
pub fn error_reply(e: MarketError) -> (StatusCode, Json<ErrorBody>) {
    debug!("Request failed: {}", e);
    let min_price = match &e {
        MarketError::PriceTooLow { min_price } => Some(*min_price),
        _ => None,
    };
    let body = ErrorBody {
        error: e.code().to_string(),
        message: e.to_string(),
        min_price,
    };
    (e.status(), Json(body))
}
