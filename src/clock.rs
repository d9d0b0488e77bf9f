//! Wall-clock abstraction used to stamp and evaluate entry expiry.

use std::ops::Add;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> SystemTime;

    /// Returns the current time as milliseconds since the Unix epoch.
    ///
    /// Times before the epoch clamp to zero.
    fn now_millis(&self) -> u64 {
        self.now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

/// Clock backed by [`SystemTime::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Manually driven clock for exercising expiry in tests.
#[derive(Debug)]
pub struct MockClock {
    now: RwLock<SystemTime>,
}

impl MockClock {
    /// Creates a clock frozen at `time`.
    pub fn with_time(time: SystemTime) -> Self {
        Self {
            now: RwLock::new(time),
        }
    }

    /// Creates a clock frozen at the current system time.
    pub fn new() -> Self {
        Self::with_time(SystemTime::now())
    }

    /// Moves the clock forward.
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.write();
        *now = now.add(duration);
    }

    /// Sets the clock to an absolute time.
    pub fn set_time(&self, time: SystemTime) {
        *self.now.write() = time;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> SystemTime {
        *self.now.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_clock_advance() {
        let clock = MockClock::with_time(UNIX_EPOCH + Duration::from_secs(10));
        assert_eq!(clock.now_millis(), 10_000);

        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.now_millis(), 11_500);

        clock.set_time(UNIX_EPOCH);
        assert_eq!(clock.now_millis(), 0);
    }
}
