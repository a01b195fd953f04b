//! Cancellable background timers
//!
//! Timers are tokio tasks. A [`TimerHandle`] is owned by whichever component
//! started the timer and must be cancelled before that component is
//! disposed; cancelling both flips the shared flag and aborts the task, so a
//! cancelled timer never fires again even if it is parked mid-sleep.
//!
//! When no tokio runtime is available the timer is not started: a warning is
//! logged and an already-cancelled handle is returned, so callers never
//! panic just because they were constructed outside a runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::{sleep, MissedTickBehavior};
use tracing::warn;

/// A timer handle that can be used to cancel a timer
#[derive(Debug, Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    task: Arc<Mutex<Option<AbortHandle>>>,
}

impl TimerHandle {
    fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)), task: Arc::new(Mutex::new(None)) }
    }

    fn inert() -> Self {
        let handle = Self::new();
        handle.cancelled.store(true, Ordering::SeqCst);
        handle
    }

    fn attach(&self, task: AbortHandle) {
        *self.task.lock() = Some(task);
    }

    /// Cancel the timer. Safe to call repeatedly.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    /// Check if the timer has been cancelled (or stopped itself)
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Run `callback` once after `delay`, unless cancelled first
pub fn after<F>(delay: Duration, callback: F) -> TimerHandle
where
    F: FnOnce() + Send + 'static,
{
    let Ok(runtime) = Handle::try_current() else {
        warn!(delay_ms = delay.as_millis() as u64, "No tokio runtime; one-shot timer not started");
        return TimerHandle::inert();
    };

    let handle = TimerHandle::new();
    let flag = Arc::clone(&handle.cancelled);

    let task = runtime.spawn(async move {
        sleep(delay).await;
        if !flag.swap(true, Ordering::SeqCst) {
            callback();
        }
    });
    handle.attach(task.abort_handle());

    handle
}

/// Create a recurring timer
///
/// The first tick fires one full `period` after the call. The callback
/// returns `true` to keep the timer running and `false` to stop it; a
/// stopped timer reports `is_cancelled() == true`.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
///
/// use perfguard_common::time::timer::recurring;
///
/// #[tokio::main]
/// async fn main() {
///     let handle = recurring(Duration::from_secs(1), || {
///         println!("Tick!");
///         true
///     });
///
///     tokio::time::sleep(Duration::from_secs(5)).await;
///     handle.cancel();
/// }
/// ```
pub fn recurring<F>(period: Duration, mut callback: F) -> TimerHandle
where
    F: FnMut() -> bool + Send + 'static,
{
    let Ok(runtime) = Handle::try_current() else {
        warn!(
            period_ms = period.as_millis() as u64,
            "No tokio runtime; recurring timer not started"
        );
        return TimerHandle::inert();
    };

    let handle = TimerHandle::new();
    let flag = Arc::clone(&handle.cancelled);
    let period = period.max(Duration::from_millis(1));

    let task = runtime.spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await; // Skip first immediate tick

        while !flag.load(Ordering::SeqCst) {
            interval.tick().await;
            if flag.load(Ordering::SeqCst) {
                break;
            }
            if !callback() {
                flag.store(true, Ordering::SeqCst);
            }
        }
    });
    handle.attach(task.abort_handle());

    handle
}

#[cfg(test)]
mod tests {
    //! Unit tests for time::timer.
    use std::sync::atomic::AtomicU32;

    use super::*;

    /// Validates `TimerHandle::new` behavior for the timer handle cancel
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures `!handle.is_cancelled()` evaluates to true.
    /// - Ensures `handle.is_cancelled()` evaluates to true after two cancels.
    #[tokio::test]
    async fn test_timer_handle_cancel_is_idempotent() {
        let handle = TimerHandle::new();
        assert!(!handle.is_cancelled());

        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
    }

    /// Validates `after` fires exactly once.
    ///
    /// Assertions:
    /// - Confirms `counter.load(Ordering::SeqCst)` equals `1`.
    #[tokio::test]
    async fn test_after_fires_once() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let _handle = after(Duration::from_millis(10), move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    /// Validates a cancelled one-shot timer never fires.
    ///
    /// Assertions:
    /// - Confirms `counter.load(Ordering::SeqCst)` equals `0`.
    #[tokio::test]
    async fn test_after_cancelled() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let handle = after(Duration::from_millis(30), move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        handle.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    /// Validates a recurring timer stops itself when the callback returns
    /// `false`.
    ///
    /// Assertions:
    /// - Confirms the callback ran exactly 3 times.
    /// - Ensures `handle.is_cancelled()` evaluates to true.
    #[tokio::test]
    async fn test_recurring_stops_when_callback_declines() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let handle = recurring(Duration::from_millis(5), move || {
            counter_clone.fetch_add(1, Ordering::SeqCst) + 1 < 3
        });

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(handle.is_cancelled());
    }

    /// Validates `recurring` keeps firing until cancelled.
    ///
    /// Assertions:
    /// - Ensures the tick count stops growing after cancellation.
    #[tokio::test]
    async fn test_recurring_cancel() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let handle = recurring(Duration::from_millis(5), move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            true
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.cancel();
        let seen = counter.load(Ordering::SeqCst);
        assert!(seen >= 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(counter.load(Ordering::SeqCst), seen);
    }

    /// Validates timers degrade to inert handles outside a runtime.
    #[test]
    fn test_no_runtime_returns_inert_handle() {
        let handle = recurring(Duration::from_millis(5), || true);
        assert!(handle.is_cancelled());

        let handle = after(Duration::from_millis(5), || {});
        assert!(handle.is_cancelled());
    }
}
