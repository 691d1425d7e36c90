//! Spaced-repetition review scheduling.
//!
//! The standard feedback loop: confident recall grows the interval
//! multiplicatively, a shaky pass holds it flat, and a failed recall
//! resets it toward one day. The caller appends the resulting review
//! log entry and persists the new interval; the previous interval is
//! an input, so writes against the same entity must be serialized.

use chrono::{DateTime, Duration, Utc};

use crate::error::EngineError;

/// Interval multiplier applied on a confident recall (rating 4 or 5).
pub const GROWTH_FACTOR: f64 = 2.0;

/// Extra multiplier on a perfect recall (rating 5), on top of
/// `GROWTH_FACTOR`.
pub const EASY_BONUS: f64 = 1.25;

/// A rating of 2 divides the interval by this instead of a full reset.
pub const LAPSE_DIVISOR: i64 = 2;

/// Intervals never fall below this; also the reset target on rating 1.
pub const MIN_INTERVAL_DAYS: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Scheduled {
    pub next_review: DateTime<Utc>,
    pub interval_days: i64,
}

/// Compute the next review date from a recall-quality rating.
///
/// `prior_interval_days` must be >= 1 and `rating` in 1..=5; anything
/// else fails with `InvalidReviewInput` and nothing is mutated.
pub fn schedule(
    prior_interval_days: i64,
    rating: i64,
    review_date: DateTime<Utc>,
) -> Result<Scheduled, EngineError> {
    if prior_interval_days < MIN_INTERVAL_DAYS {
        return Err(EngineError::InvalidReviewInput(format!(
            "prior interval must be >= {} days, got {}",
            MIN_INTERVAL_DAYS, prior_interval_days
        )));
    }
    if !(1..=5).contains(&rating) {
        return Err(EngineError::InvalidReviewInput(format!(
            "rating must be 1-5, got {}",
            rating
        )));
    }

    let interval_days = match rating {
        5 => (prior_interval_days as f64 * GROWTH_FACTOR * EASY_BONUS).ceil() as i64,
        4 => (prior_interval_days as f64 * GROWTH_FACTOR).ceil() as i64,
        3 => prior_interval_days,
        2 => (prior_interval_days / LAPSE_DIVISOR).max(MIN_INTERVAL_DAYS),
        _ => MIN_INTERVAL_DAYS,
    };

    Ok(Scheduled {
        next_review: review_date + Duration::days(interval_days),
        interval_days,
    })
}

/// Parse a stored review date; malformed input is a caller error, not
/// a scheduling outcome.
pub fn parse_review_date(s: &str) -> Result<DateTime<Utc>, EngineError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| EngineError::InvalidReviewInput(format!("invalid review date: {}", s)))
}
