//! Active-window predicate
//!
//! A visitor is active while `last_visit + window > now`. The comparison is
//! strict: a record expires at the exact second its window ends.

use chrono::Duration;
use thiserror::Error;

const SECS_PER_MINUTE: i64 = 60;
const SECS_PER_HOUR: i64 = 60 * SECS_PER_MINUTE;
const SECS_PER_DAY: i64 = 24 * SECS_PER_HOUR;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ThresholdError {
    #[error("active window must be positive, got {0} seconds")]
    NotPositive(i64),
    #[error("active window is too large")]
    Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Threshold {
    window: Duration,
}

impl Threshold {
    pub const DEFAULT_DAYS: i64 = 0;
    pub const DEFAULT_HOURS: i64 = 2;
    pub const DEFAULT_MINUTES: i64 = 0;

    /// Build a window from its configured parts.
    ///
    /// A zero or negative window would evict every record on the next
    /// count, so it is refused.
    pub fn new(days: i64, hours: i64, minutes: i64) -> Result<Self, ThresholdError> {
        let secs = days
            .checked_mul(SECS_PER_DAY)
            .and_then(|d| hours.checked_mul(SECS_PER_HOUR).and_then(|h| d.checked_add(h)))
            .and_then(|dh| minutes.checked_mul(SECS_PER_MINUTE).and_then(|m| dh.checked_add(m)))
            .ok_or(ThresholdError::Overflow)?;

        if secs <= 0 {
            return Err(ThresholdError::NotPositive(secs));
        }

        let window = Duration::try_seconds(secs).ok_or(ThresholdError::Overflow)?;
        Ok(Self { window })
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether a visit at `last_visit` is still inside the window at `now`
    /// (both Unix seconds).
    pub fn is_active(&self, last_visit: i64, now: i64) -> bool {
        last_visit.saturating_add(self.window.num_seconds()) > now
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self {
            window: Duration::hours(Self::DEFAULT_HOURS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn test_window_from_parts() {
        let threshold = Threshold::new(1, 2, 3).unwrap();
        assert_eq!(threshold.window().num_seconds(), 86_400 + 7_200 + 180);
    }

    #[test]
    fn test_default_is_two_hours() {
        let threshold = Threshold::default();
        assert_eq!(threshold.window(), Duration::hours(2));
        assert_eq!(
            Threshold::new(
                Threshold::DEFAULT_DAYS,
                Threshold::DEFAULT_HOURS,
                Threshold::DEFAULT_MINUTES
            )
            .unwrap(),
            threshold
        );
    }

    #[test]
    fn test_expiry_boundary_is_exclusive() {
        let threshold = Threshold::new(0, 0, 10).unwrap();
        let window = threshold.window().num_seconds();

        assert!(!threshold.is_active(NOW - window, NOW));
        assert!(threshold.is_active(NOW - window + 1, NOW));
        assert!(threshold.is_active(NOW, NOW));
    }

    #[test]
    fn test_future_visit_is_active() {
        let threshold = Threshold::default();
        assert!(threshold.is_active(NOW + 60, NOW));
    }

    #[test]
    fn test_extreme_timestamp_does_not_overflow() {
        let threshold = Threshold::default();
        assert!(threshold.is_active(i64::MAX, NOW));
        assert!(!threshold.is_active(i64::MIN, NOW));
    }

    #[test]
    fn test_zero_window_is_rejected() {
        assert_eq!(Threshold::new(0, 0, 0), Err(ThresholdError::NotPositive(0)));
        assert_eq!(
            Threshold::new(0, -1, 30),
            Err(ThresholdError::NotPositive(-1_800))
        );
    }

    #[test]
    fn test_huge_window_is_rejected() {
        assert_eq!(Threshold::new(i64::MAX, 0, 0), Err(ThresholdError::Overflow));
    }
}
