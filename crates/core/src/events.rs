//! Typed listener interface for telemetry events
//!
//! Components publish to a shared [`ListenerRegistry`]. Delivery is
//! synchronous, best-effort and isolated: a listener that returns an error
//! or panics is logged and skipped, and the remaining listeners still see
//! the event.
//!
//! Callbacks run on the thread that produced the event, while the emitting
//! component is mid-operation. They must not call back into that component.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::error;

use crate::alerts::Alert;
use crate::benchmark::Benchmark;
use crate::breaker::CircuitBreakerState;
use crate::startup::{StartupPhase, StartupProfile};

/// Boxed error type returned by listeners
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Listener callback result
pub type ListenerResult = Result<(), BoxedError>;

/// Observer for telemetry events. Every method defaults to a no-op.
pub trait TelemetryListener: Send + Sync {
    /// Label used when logging failures
    fn name(&self) -> &str {
        "listener"
    }

    fn on_alert(&self, _alert: &Alert) -> ListenerResult {
        Ok(())
    }

    fn on_breaker_tripped(&self, _state: &CircuitBreakerState) -> ListenerResult {
        Ok(())
    }

    fn on_breaker_reset(&self, _state: &CircuitBreakerState) -> ListenerResult {
        Ok(())
    }

    /// Calibration gathered too few samples; collection is off for good
    fn on_breaker_disabled(&self, _calibration_samples: usize) -> ListenerResult {
        Ok(())
    }

    fn on_phase_started(&self, _phase: &StartupPhase) -> ListenerResult {
        Ok(())
    }

    fn on_phase_ended(&self, _phase: &StartupPhase) -> ListenerResult {
        Ok(())
    }

    fn on_benchmark_completed(&self, _benchmark: &Benchmark) -> ListenerResult {
        Ok(())
    }

    fn on_startup_complete(&self, _profile: &StartupProfile) -> ListenerResult {
        Ok(())
    }
}

/// Shared, cloneable set of listeners
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    listeners: Arc<RwLock<Vec<Arc<dyn TelemetryListener>>>>,
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry").field("listeners", &self.len()).finish()
    }
}

impl ListenerRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `listener`; delivery follows registration order
    pub fn register(&self, listener: Arc<dyn TelemetryListener>) {
        self.listeners.write().push(listener);
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Whether no listener is registered
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Remove every listener
    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    /// Deliver one event to every listener; returns how many accepted it.
    ///
    /// The listener list is snapshotted first, so a listener may register
    /// further listeners without deadlocking.
    pub(crate) fn emit<F>(&self, event: &'static str, deliver: F) -> usize
    where
        F: Fn(&dyn TelemetryListener) -> ListenerResult,
    {
        let snapshot: Vec<Arc<dyn TelemetryListener>> = self.listeners.read().clone();

        let mut delivered = 0;
        for listener in snapshot {
            match catch_unwind(AssertUnwindSafe(|| deliver(listener.as_ref()))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => {
                    error!(listener = listener.name(), event, error = %err, "Listener failed");
                }
                Err(payload) => {
                    error!(
                        listener = listener.name(),
                        event,
                        panic = panic_message(payload.as_ref()),
                        "Listener panicked"
                    );
                }
            }
        }
        delivered
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
