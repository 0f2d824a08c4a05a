//! American odds math.
//!
//! Spread pricing tiers, the favorite win-probability ladder, probability
//! to odds conversion and settlement payouts. The ladder has four buckets;
//! the two moneyline sides are priced from `p` and `1 - p` independently.

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;

use crate::types::Outcome;

/// Flat juice offered on both sides of a total.
pub const STANDARD_VIG: i32 = -110;

/// Round a margin to the nearest half point.
pub fn round_to_half(value: f64) -> f64 {
    (value * 2.0).round() / 2.0
}

/// Round to two decimal places (projected scores, totals).
pub fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Spread juice by line magnitude. Tight lines are cheaper, blowout lines
/// are priced heavier.
pub fn spread_odds(spread: f64) -> i32 {
    let spread = spread.abs();
    if spread <= 3.0 {
        -110
    } else if spread <= 7.0 {
        -105
    } else if spread <= 14.0 {
        -115
    } else {
        -120
    }
}

/// Implied win probability of the favorite for a given spread magnitude.
pub fn favorite_win_probability(spread: f64) -> f64 {
    let spread = spread.abs();
    if spread <= 3.0 {
        0.55
    } else if spread <= 7.0 {
        0.62
    } else if spread <= 14.0 {
        0.70
    } else {
        0.78
    }
}

/// Convert an implied probability into American odds.
///
/// `p > 0.5` prices a favorite (negative odds); anything else prices an
/// underdog (positive odds). `p` must lie strictly between 0 and 1.
pub fn probability_to_american(p: f64) -> i32 {
    if p > 0.5 {
        (-(p / (1.0 - p)) * 100.0).round() as i32
    } else {
        (((1.0 - p) / p) * 100.0).round() as i32
    }
}

/// Winnings (excluding the returned stake) on a winning wager.
pub fn profit(stake: Decimal, odds: i32) -> Decimal {
    match odds {
        o if o > 0 => stake * Decimal::from(o) / dec!(100),
        o if o < 0 => stake * dec!(100) / Decimal::from(o.unsigned_abs()),
        _ => Decimal::ZERO,
    }
}

/// Total amount credited back to the bettor at settlement, rounded to
/// hundredths (half away from zero).
///
/// WON returns stake plus profit, PUSH returns the stake, LOST returns 0.
pub fn payout(stake: Decimal, odds: i32, outcome: Outcome) -> Decimal {
    let raw = match outcome {
        Outcome::Won => stake + profit(stake, odds),
        Outcome::Push => stake,
        Outcome::Lost => Decimal::ZERO,
    };
    raw.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
