//! Counter rows and the rate limit result derived from them.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// The persisted state of a single key.
///
/// One row exists per key. `expire` is `None` when the window never ends
/// (a limiter configured with a zero duration).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRow {
    /// Points consumed in the current window
    pub points: i64,
    /// End of the current window or block, in epoch milliseconds
    pub expire: Option<i64>,
}

impl CounterRow {
    /// Create a new counter row.
    pub fn new(points: i64, expire: Option<i64>) -> Self {
        Self { points, expire }
    }

    /// Whether the window described by this row has ended at `now`.
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expire, Some(expire) if expire <= now)
    }

    /// Milliseconds from `now` until the row expires, floored at zero.
    pub fn ms_before_expire(&self, now: i64) -> u64 {
        self.expire
            .map(|expire| expire.saturating_sub(now).max(0) as u64)
            .unwrap_or(0)
    }
}

/// Outcome of a ledger operation for one key.
///
/// The same shape is returned on success and carried by an over-limit
/// rejection, so callers can back off without a second read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterRes {
    /// Points left in the current window
    pub remaining_points: u32,
    /// Milliseconds until the window or block resets
    pub ms_before_next: u64,
    /// Points consumed so far in the current window
    pub consumed_points: i64,
    /// True when this call opened the window
    pub is_first_in_duration: bool,
}

impl RateLimiterRes {
    /// Derive a result from the row a call left behind.
    ///
    /// `requested` is the amount this call contributed. A row whose total
    /// equals that amount had nothing consumed before it in this window.
    pub fn from_row(limit: u32, requested: i64, row: &CounterRow, now: i64) -> Self {
        let limit = i64::from(limit);
        let remaining = limit.saturating_sub(row.points).max(0);

        Self {
            remaining_points: u32::try_from(remaining).unwrap_or(u32::MAX),
            ms_before_next: row.ms_before_expire(now),
            consumed_points: row.points,
            is_first_in_duration: row.points == requested,
        }
    }

    /// Standard rate limit response headers for this result.
    ///
    /// `X-RateLimit-Reset` is the reset instant in epoch seconds.
    pub fn headers(&self, limit: u32, now: i64) -> Vec<(&'static str, String)> {
        let retry_after = self.ms_before_next.div_ceil(1000);
        let reset_ms = now.saturating_add(self.ms_before_next as i64);

        vec![
            ("Retry-After", retry_after.to_string()),
            ("X-RateLimit-Limit", limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining_points.to_string()),
            ("X-RateLimit-Reset", reset_ms.div_euclid(1000).to_string()),
        ]
    }
}

impl fmt::Display for RateLimiterRes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} consumed, {} remaining, resets in {}ms",
            self.consumed_points, self.remaining_points, self.ms_before_next
        )?;
        if self.is_first_in_duration {
            write!(f, " (new window)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_from_active_row() {
        let now = now_ms();
        let row = CounterRow::new(3, Some(now + 1000));

        let res = RateLimiterRes::from_row(5, 1, &row, now);

        assert!(res.ms_before_next <= 1000);
        assert_eq!(res.consumed_points, 3);
        assert!(!res.is_first_in_duration);
        assert_eq!(res.remaining_points, 2);
    }

    #[test]
    fn test_derive_first_in_duration() {
        let row = CounterRow::new(2, Some(10_000));

        let res = RateLimiterRes::from_row(5, 2, &row, 0);

        assert!(res.is_first_in_duration);
        assert_eq!(res.ms_before_next, 10_000);
    }

    #[test]
    fn test_remaining_floors_at_zero() {
        let row = CounterRow::new(7, Some(500));

        let res = RateLimiterRes::from_row(5, 2, &row, 0);
        assert_eq!(res.remaining_points, 0);
        assert_eq!(res.consumed_points, 7);
    }

    #[test]
    fn test_remaining_grows_past_limit_after_reward() {
        let row = CounterRow::new(-3, Some(500));

        let res = RateLimiterRes::from_row(5, 0, &row, 0);
        assert_eq!(res.remaining_points, 8);
    }

    #[test]
    fn test_ms_before_next_without_expiry() {
        let row = CounterRow::new(1, None);

        let res = RateLimiterRes::from_row(5, 1, &row, now_ms());
        assert_eq!(res.ms_before_next, 0);
    }

    #[test]
    fn test_ms_before_next_floors_at_zero() {
        let row = CounterRow::new(1, Some(1_000));

        let res = RateLimiterRes::from_row(5, 1, &row, 5_000);
        assert_eq!(res.ms_before_next, 0);
    }

    #[test]
    fn test_row_expiry() {
        assert!(CounterRow::new(1, Some(100)).is_expired(100));
        assert!(!CounterRow::new(1, Some(101)).is_expired(100));
        assert!(!CounterRow::new(1, None).is_expired(i64::MAX));
    }

    #[test]
    fn test_headers() {
        let res = RateLimiterRes {
            remaining_points: 0,
            ms_before_next: 1_500,
            consumed_points: 11,
            is_first_in_duration: false,
        };

        let headers = res.headers(10, 2_000);

        assert_eq!(
            headers,
            vec![
                ("Retry-After", "2".to_string()),
                ("X-RateLimit-Limit", "10".to_string()),
                ("X-RateLimit-Remaining", "0".to_string()),
                ("X-RateLimit-Reset", "3".to_string()),
            ]
        );
    }

    #[test]
    fn test_json_field_names() {
        let res = RateLimiterRes {
            remaining_points: 1,
            ms_before_next: 250,
            consumed_points: 3,
            is_first_in_duration: true,
        };

        let json = serde_json::to_value(res).unwrap();
        assert_eq!(json["remainingPoints"], 1);
        assert_eq!(json["msBeforeNext"], 250);
        assert_eq!(json["consumedPoints"], 3);
        assert_eq!(json["isFirstInDuration"], true);
    }

    #[test]
    fn test_display() {
        let res = RateLimiterRes {
            remaining_points: 4,
            ms_before_next: 900,
            consumed_points: 1,
            is_first_in_duration: true,
        };

        assert_eq!(
            res.to_string(),
            "1 consumed, 4 remaining, resets in 900ms (new window)"
        );
    }
}
