use chrono::{NaiveDate, TimeZone, Utc};
use chrono::{DateTime, Datelike};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::api::MarketError;

/// Stakes can only be placed on days this far ahead of today.
pub const MIN_OFFSET_DAYS: i64 = 4;
pub const MAX_OFFSET_DAYS: i64 = 31;

const WEEKDAYS_FR: [&str; 7] = [
    "Lundi", "Mardi", "Mercredi", "Jeudi", "Vendredi", "Samedi", "Dimanche",
];
const MONTHS_FR: [&str; 12] = [
    "janvier",
    "février",
    "mars",
    "avril",
    "mai",
    "juin",
    "juillet",
    "août",
    "septembre",
    "octobre",
    "novembre",
    "décembre",
];

/// Base odds for a stake placed `offset` days before its target day.
/// Short offsets pay almost nothing, the far end of the calendar pays
/// triple. Outside the schedule there is no quote at all.
pub fn odds_for_offset(offset: i64) -> Option<Decimal> {
    let odds = match offset {
        1 | 2 => dec!(1.0),
        3 => dec!(1.1),
        4 => dec!(1.2),
        5 => dec!(1.3),
        6 => dec!(1.4),
        7 => dec!(1.5),
        8 => dec!(1.6),
        9 => dec!(1.7),
        10 => dec!(1.8),
        11..=18 => dec!(2.0),
        19 | 20 => dec!(2.5),
        21 => dec!(2.4),
        22 => dec!(2.3),
        23 | 24 => dec!(2.2),
        25 => dec!(2.0),
        26 => dec!(2.1),
        27 => dec!(2.4),
        28 => dec!(2.7),
        29 => dec!(2.8),
        30 => dec!(2.9),
        31 => dec!(3.0),
        _ => return None,
    };
    Some(odds)
}

/// Validates the betting window and returns the base odds for a stake
/// placed today on `target`. The first three days and anything past the
/// 31 day calendar are closed.
pub fn quote(today: NaiveDate, target: NaiveDate) -> Result<Decimal, MarketError> {
    let offset = (target - today).num_days();
    if !(MIN_OFFSET_DAYS..=MAX_OFFSET_DAYS).contains(&offset) {
        return Err(MarketError::OutsideBettingWindow);
    }
    odds_for_offset(offset).ok_or(MarketError::OutsideBettingWindow)
}

/// Listings stay visible until the very end of their target day, UTC.
pub fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    let eod = date.and_hms_opt(23, 59, 59).unwrap();
    Utc.from_utc_datetime(&eod)
}

/// French calendar label shown next to every stake, like "Lundi 27 novembre".
pub fn date_label(date: NaiveDate) -> String {
    let weekday = WEEKDAYS_FR[date.weekday().num_days_from_monday() as usize];
    let month = MONTHS_FR[date.month0() as usize];
    format!("{} {} {}", weekday, date.day(), month)
}
