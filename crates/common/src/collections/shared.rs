//! Thread-safe [`RingStore`] with a background TTL sweep.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::ring_store::{RingStore, RingStoreConfig};
use crate::error::CommonResult;
use crate::time::timer::{recurring, TimerHandle};
use crate::time::{Clock, SystemClock};

/// A [`RingStore`] behind a mutex that can sweep itself on a timer.
///
/// The sweep holds only a weak reference to the store, so dropping the
/// last `SharedRingStore` stops it even if `stop_cleanup` was never
/// called.
pub struct SharedRingStore<T, C: Clock = SystemClock> {
    inner: Arc<Mutex<RingStore<T, C>>>,
    cleanup: Mutex<Option<TimerHandle>>,
}

impl<T: Send + 'static> SharedRingStore<T, SystemClock> {
    /// Create a shared store backed by the system clock
    pub fn new(config: RingStoreConfig) -> CommonResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<T: Send + 'static, C: Clock> SharedRingStore<T, C> {
    /// Create a shared store with a custom clock
    pub fn with_clock(config: RingStoreConfig, clock: C) -> CommonResult<Self> {
        let store = RingStore::with_clock(config, clock)?;
        Ok(Self { inner: Arc::new(Mutex::new(store)), cleanup: Mutex::new(None) })
    }

    /// Run `f` with exclusive access to the underlying store
    pub fn with<R>(&self, f: impl FnOnce(&mut RingStore<T, C>) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// See [`RingStore::push`]
    pub fn push(&self, item: T) -> bool {
        self.inner.lock().push(item)
    }

    /// See [`RingStore::cleanup`]
    pub fn cleanup(&self) -> usize {
        self.inner.lock().cleanup()
    }

    /// Number of items currently stored
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns `true` when the store has no items
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Start sweeping expired items every `interval`.
    ///
    /// Replaces any sweep already running. Requires a tokio runtime; outside
    /// one the sweep is not started and [`is_cleanup_running`] stays `false`.
    ///
    /// [`is_cleanup_running`]: SharedRingStore::is_cleanup_running
    pub fn start_cleanup(&self, interval: Duration) {
        let weak: Weak<Mutex<RingStore<T, C>>> = Arc::downgrade(&self.inner);
        let handle = recurring(interval, move || {
            let Some(store) = weak.upgrade() else {
                return false;
            };
            let removed = store.lock().cleanup();
            if removed > 0 {
                trace!(removed, "Ring store TTL sweep");
            }
            true
        });

        if let Some(previous) = self.cleanup.lock().replace(handle) {
            previous.cancel();
        }
        debug!(interval_ms = interval.as_millis() as u64, "Ring store cleanup started");
    }

    /// Stop the background sweep. Safe to call when none is running.
    pub fn stop_cleanup(&self) {
        if let Some(handle) = self.cleanup.lock().take() {
            handle.cancel();
        }
    }

    /// Whether a background sweep is currently scheduled
    pub fn is_cleanup_running(&self) -> bool {
        self.cleanup.lock().as_ref().is_some_and(|handle| !handle.is_cancelled())
    }
}

impl<T: Clone + Send + 'static, C: Clock> SharedRingStore<T, C> {
    /// Snapshot of the stored items, oldest first
    pub fn to_vec(&self) -> Vec<T> {
        self.inner.lock().to_vec()
    }
}

impl<T, C: Clock> Drop for SharedRingStore<T, C> {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup.get_mut().take() {
            handle.cancel();
        }
    }
}
