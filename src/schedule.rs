//! Candle-interval timing
//!
//! The live loop wakes on interval boundaries, checks that the exchange has
//! produced the candle for the boundary that just passed, and honors
//! configured no-trade hour windows. All of that is pure arithmetic on UTC
//! timestamps, kept here so it can be tested without a clock.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IntervalError {
    #[error("invalid interval '{0}': use <n>s, <n>m or <n>h")]
    Invalid(String),
}

/// Parse a timeframe string ("15m", "1h", "30s") into seconds
pub fn parse_interval(interval: &str) -> Result<u64, IntervalError> {
    let (digits, unit) = interval.split_at(interval.len().saturating_sub(1));
    let n: u64 = digits
        .parse()
        .map_err(|_| IntervalError::Invalid(interval.to_string()))?;
    if n == 0 {
        return Err(IntervalError::Invalid(interval.to_string()));
    }

    match unit {
        "s" => Ok(n),
        "m" => Ok(n * 60),
        "h" => Ok(n * 3600),
        _ => Err(IntervalError::Invalid(interval.to_string())),
    }
}

/// Seconds to sleep until the next interval boundary
///
/// Returns a full interval when called exactly on a boundary, so a loop
/// that runs at each boundary never fires twice for the same candle.
pub fn secs_until_next_boundary(now: DateTime<Utc>, interval_secs: u64) -> u64 {
    let now_secs = now.timestamp() as u64;
    let remainder = now_secs % interval_secs;
    interval_secs - remainder
}

/// Epoch seconds of the two most recent closed candles for the interval
///
/// The candle opening at `(n-1) * interval` is the last one that has closed;
/// the one before it opened at `(n-2) * interval`.
pub fn expected_closed_timestamps(now: DateTime<Utc>, interval_secs: u64) -> (i64, i64) {
    let n = now.timestamp().div_euclid(interval_secs as i64);
    ((n - 2) * interval_secs as i64, (n - 1) * interval_secs as i64)
}

/// Check whether the given UTC hour is outside every forbidden window
///
/// Windows are inclusive on both ends and may wrap midnight: `(23, 1)`
/// forbids hours 23, 0 and 1.
pub fn is_trading_allowed(hour: u32, forbidden_hours: &[(u32, u32)]) -> bool {
    for &(start, end) in forbidden_hours {
        if start <= end {
            if (start..=end).contains(&hour) {
                return false;
            }
        } else if hour >= start || hour <= end {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_common_intervals() {
        assert_eq!(parse_interval("15m").unwrap(), 900);
        assert_eq!(parse_interval("1h").unwrap(), 3600);
        assert_eq!(parse_interval("30s").unwrap(), 30);
    }

    #[test]
    fn rejects_malformed_intervals() {
        assert!(parse_interval("15").is_err());
        assert!(parse_interval("m").is_err());
        assert!(parse_interval("0m").is_err());
        assert!(parse_interval("1d").is_err());
    }

    #[test]
    fn boundary_wait_counts_down() {
        // 12:07:30 with 15m candles: 7.5 minutes to 12:15
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 7, 30).unwrap();
        assert_eq!(secs_until_next_boundary(now, 900), 450);
    }

    #[test]
    fn boundary_wait_on_exact_boundary_is_full_interval() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 15, 0).unwrap();
        assert_eq!(secs_until_next_boundary(now, 900), 900);
    }

    #[test]
    fn expected_timestamps_are_prior_boundaries() {
        // 12:16:10: the 12:00 candle closed at 12:15; 11:45 before it
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 16, 10).unwrap();
        let (prev, last) = expected_closed_timestamps(now, 900);
        let noon = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(last, noon.timestamp());
        assert_eq!(prev, noon.timestamp() - 900);
    }

    #[test]
    fn forbidden_window_blocks_inclusive_range() {
        let windows = vec![(8, 10)];
        assert!(is_trading_allowed(7, &windows));
        assert!(!is_trading_allowed(8, &windows));
        assert!(!is_trading_allowed(10, &windows));
        assert!(is_trading_allowed(11, &windows));
    }

    #[test]
    fn forbidden_window_wraps_midnight() {
        let windows = vec![(23, 1)];
        assert!(!is_trading_allowed(23, &windows));
        assert!(!is_trading_allowed(0, &windows));
        assert!(!is_trading_allowed(1, &windows));
        assert!(is_trading_allowed(2, &windows));
        assert!(is_trading_allowed(22, &windows));
    }

    #[test]
    fn no_windows_allows_all_hours() {
        for hour in 0..24 {
            assert!(is_trading_allowed(hour, &[]));
        }
    }
}
