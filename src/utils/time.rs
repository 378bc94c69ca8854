use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, NaiveDate};

pub const MS_PER_SECOND: i64 = 1_000;
pub const MS_PER_MINUTE: i64 = 60 * MS_PER_SECOND;
pub const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;
pub const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// Source of wall-clock time in milliseconds since the Unix epoch.
pub trait TimeProvider: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Clone, Default)]
pub struct SystemTimeProvider;

impl SystemTimeProvider {
    pub fn new() -> Self {
        SystemTimeProvider
    }
}

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default()
    }
}

/// Manually driven clock for tests.
#[derive(Default)]
pub struct TestTimeProvider {
    current: AtomicI64,
}

impl TestTimeProvider {
    pub fn new(start: i64) -> Self {
        TestTimeProvider {
            current: AtomicI64::new(start),
        }
    }

    pub fn set_time(&self, millis: i64) {
        self.current.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.current.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeProvider for TestTimeProvider {
    fn now_millis(&self) -> i64 {
        self.current.load(Ordering::SeqCst)
    }
}

/// UTC calendar day of a millisecond timestamp.
pub fn calendar_day(millis: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(millis).map(|dt| dt.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_time_provider() {
        let provider = SystemTimeProvider::new();
        let first = provider.now_millis();
        let second = provider.now_millis();
        assert!(second >= first);
    }

    #[test]
    fn test_test_time_provider() {
        let provider = TestTimeProvider::new(1_000);
        assert_eq!(provider.now_millis(), 1_000);

        provider.set_time(5_000);
        assert_eq!(provider.now_millis(), 5_000);

        provider.advance(MS_PER_SECOND);
        assert_eq!(provider.now_millis(), 6_000);
    }

    #[test]
    fn test_calendar_day_boundaries() {
        // 2024-03-01T23:59:59.999Z and 2024-03-02T00:00:00Z
        let before_midnight = 1_709_337_599_999;
        let midnight = 1_709_337_600_000;

        assert_ne!(calendar_day(before_midnight), calendar_day(midnight));
        assert_eq!(calendar_day(midnight), calendar_day(midnight + MS_PER_HOUR));
    }
}
