//! Time abstraction for testability
//!
//! Every timestamp the telemetry core takes goes through a [`Clock`], so TTL
//! eviction, overhead sampling windows and phase durations can be driven
//! deterministically in tests without relying on actual time passage.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use perfguard_common::time::{Clock, MockClock, SystemClock};
//!
//! // Use system clock in production
//! let clock = SystemClock;
//! let _now = clock.now();
//!
//! // Use mock clock in tests
//! let mock = MockClock::new();
//! let start = mock.now();
//! mock.advance(Duration::from_secs(5));
//! assert_eq!(mock.now().duration_since(start), Duration::from_secs(5));
//! ```

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Trait for time operations to enable testing
///
/// `now` is monotonic and used for elapsed-time arithmetic; `system_time` is
/// wall clock and used for the millisecond timestamps stamped on recorded
/// points.
pub trait Clock: Send + Sync + 'static {
    /// Get current instant (monotonic time)
    fn now(&self) -> Instant;

    /// Get current system time (wall clock)
    fn system_time(&self) -> SystemTime;

    /// Get milliseconds since UNIX epoch
    fn millis_since_epoch(&self) -> u64 {
        self.system_time().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
    }
}

/// Real system clock implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }
}

/// Mock clock for deterministic testing
///
/// Clones share the same elapsed time, so a clock handed to a component can
/// still be advanced from the test body. Wall-clock time starts at the UNIX
/// epoch unless [`MockClock::starting_at`] is used, which keeps millisecond
/// timestamps predictable.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    base_system_time: SystemTime,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a new mock clock whose wall clock reads the UNIX epoch
    pub fn new() -> Self {
        Self::starting_at(UNIX_EPOCH)
    }

    /// Create a mock clock whose wall clock starts at `base_system_time`
    pub fn starting_at(base_system_time: SystemTime) -> Self {
        Self {
            start: Instant::now(),
            base_system_time,
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Advance the mock clock by a duration
    pub fn advance(&self, duration: Duration) {
        let mut elapsed = match self.elapsed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *elapsed += duration;
    }

    /// Advance the mock clock by milliseconds (convenience method)
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Set the mock clock to a specific elapsed time
    pub fn set_elapsed(&self, duration: Duration) {
        let mut elapsed = match self.elapsed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *elapsed = duration;
    }

    /// Get the current elapsed time
    pub fn elapsed(&self) -> Duration {
        match self.elapsed.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        self.base_system_time + self.elapsed()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for time::clock.
    use super::*;

    /// Validates the system clock scenario.
    ///
    /// Assertions:
    /// - Ensures `now2 >= now1` evaluates to true.
    /// - Ensures the wall clock is after the epoch.
    #[test]
    fn test_system_clock() {
        let clock = SystemClock;
        let now1 = clock.now();
        let now2 = clock.now();

        assert!(now2 >= now1);
        assert!(clock.millis_since_epoch() > 0);
    }

    /// Validates `MockClock::new` behavior for the mock clock advance scenario.
    ///
    /// Assertions:
    /// - Confirms `after.duration_since(start)` equals
    ///   `Duration::from_secs(5)`.
    #[test]
    fn test_mock_clock_advance() {
        let clock = MockClock::new();
        let start = clock.now();

        clock.advance(Duration::from_secs(5));
        let after = clock.now();

        assert_eq!(after.duration_since(start), Duration::from_secs(5));
    }

    /// Validates the mock wall clock starts at the epoch and tracks advances.
    ///
    /// Assertions:
    /// - Confirms `clock.millis_since_epoch()` equals `0` then `1500`.
    #[test]
    fn test_mock_clock_millis_since_epoch() {
        let clock = MockClock::new();
        assert_eq!(clock.millis_since_epoch(), 0);

        clock.advance_millis(1500);
        assert_eq!(clock.millis_since_epoch(), 1500);
    }

    /// Validates `MockClock::starting_at` offsets the wall clock.
    #[test]
    fn test_mock_clock_starting_at() {
        let clock = MockClock::starting_at(UNIX_EPOCH + Duration::from_secs(10));
        assert_eq!(clock.millis_since_epoch(), 10_000);

        clock.set_elapsed(Duration::from_millis(250));
        assert_eq!(clock.millis_since_epoch(), 10_250);
        assert_eq!(clock.elapsed(), Duration::from_millis(250));
    }

    /// Validates `MockClock::new` behavior for the mock clock clone scenario.
    ///
    /// Assertions:
    /// - Confirms `clock2.elapsed()` equals `Duration::from_secs(10)`.
    /// - Confirms `clock2.elapsed()` equals `Duration::from_secs(15)`.
    #[test]
    fn test_mock_clock_clone() {
        let clock1 = MockClock::new();
        clock1.advance(Duration::from_secs(10));

        let clock2 = clock1.clone();
        assert_eq!(clock2.elapsed(), Duration::from_secs(10));

        // Cloned clocks share the same elapsed time
        clock1.advance(Duration::from_secs(5));
        assert_eq!(clock2.elapsed(), Duration::from_secs(15));
    }

    /// Validates the blanket `Clock` impl for `Arc<T>`.
    #[test]
    fn test_arc_clock_delegates() {
        let clock = Arc::new(MockClock::new());
        clock.advance_millis(42);
        assert_eq!(Clock::millis_since_epoch(&clock), 42);
    }
}
