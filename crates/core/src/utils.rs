//! Shared helpers

use std::time::Duration;

/// Fractional milliseconds, exact for whole-millisecond durations
pub(crate) fn millis(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}
