//! Coin prices and the session fee split

use crate::types::{LedgerError, Result};

/// Session price in coins per hour
pub const RATE_PER_HOUR: i64 = 10;

/// Coins per hour paid to the mentor; the rest goes to the platform
pub const MENTOR_SHARE_PER_HOUR: i64 = 8;

/// Fiat units (major) per coin
pub const COIN_PRICE_FIAT: i64 = 10;

/// Minor fiat units per major unit, as the payment gateway expects
pub const FIAT_MINOR_UNITS: i64 = 100;

/// Balance that must remain after a sale
pub const MIN_RETAINED_BALANCE: i64 = 100;

/// Minimum review length in characters, after trimming
pub const MIN_REVIEW_CHARS: usize = 10;

/// Session length limit in hours
pub const MAX_DURATION_HOURS: i64 = 24;

/// How a session's cost divides between mentor and platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Split {
    pub cost: i64,
    pub mentor_share: i64,
    pub platform_share: i64,
}

/// Price of a session of `duration_hours` whole hours
pub fn session_cost(duration_hours: i64) -> Result<i64> {
    if !(1..=MAX_DURATION_HOURS).contains(&duration_hours) {
        return Err(LedgerError::Validation(format!(
            "Duration must be between 1 and {} hours, got {}",
            MAX_DURATION_HOURS, duration_hours
        )));
    }
    Ok(duration_hours * RATE_PER_HOUR)
}

/// Split a session's cost. `platform_share` is the remainder, so the two
/// shares always add up to the cost.
pub fn split(duration_hours: i64, cost: i64) -> Result<Split> {
    let mentor_share = duration_hours * MENTOR_SHARE_PER_HOUR;
    let platform_share = cost - mentor_share;
    if mentor_share <= 0 || platform_share < 0 {
        return Err(LedgerError::Internal(format!(
            "Cannot split cost {} over {} hours",
            cost, duration_hours
        )));
    }
    Ok(Split {
        cost,
        mentor_share,
        platform_share,
    })
}

/// Fiat price (major units) of `coins`
pub fn fiat_for_coins(coins: i64) -> Result<i64> {
    coins
        .checked_mul(COIN_PRICE_FIAT)
        .ok_or_else(|| LedgerError::Validation(format!("Coin amount {} is too large", coins)))
}
