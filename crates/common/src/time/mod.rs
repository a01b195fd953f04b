//! Time utilities and abstractions
//!
//! - **[`clock`]**: Real and mock clocks
//! - **[`timer`]**: Cancellable one-shot and recurring timers (runtime tier)

pub mod clock;
#[cfg(feature = "runtime")]
pub mod timer;

// Re-export commonly used items
pub use clock::{Clock, MockClock, SystemClock};
#[cfg(feature = "runtime")]
pub use timer::{after, recurring, TimerHandle};
