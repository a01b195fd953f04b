//! Shared test helpers for `perfguard-core` integration tests.
//!
//! A recording listener, monitor builders and log capture so the scenarios
//! can focus on behaviour instead of wiring. Set `RUST_LOG=perfguard_core=debug`
//! to see the monitor's logs for a failing test.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use perfguard_common::time::MockClock;
use perfguard_core::events::ListenerResult;
use perfguard_core::{
    Alert, Benchmark, CircuitBreakerState, MonitorConfig, PerformanceMonitor, StartupPhase,
    StartupProfile, TelemetryListener,
};
use tracing_subscriber::EnvFilter;

/// Route `tracing` output through the test harness, filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Every event a [`RecordingListener`] has seen, in delivery order
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Alert(Alert),
    BreakerTripped(CircuitBreakerState),
    BreakerReset(CircuitBreakerState),
    BreakerDisabled(usize),
    PhaseStarted(String),
    PhaseEnded(String),
    BenchmarkCompleted(Benchmark),
    StartupComplete(usize),
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Event>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Alert(alert) => Some(alert),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: Event) -> ListenerResult {
        self.events.lock().push(event);
        Ok(())
    }
}

impl TelemetryListener for RecordingListener {
    fn name(&self) -> &str {
        "recording"
    }

    fn on_alert(&self, alert: &Alert) -> ListenerResult {
        self.push(Event::Alert(alert.clone()))
    }

    fn on_breaker_tripped(&self, state: &CircuitBreakerState) -> ListenerResult {
        self.push(Event::BreakerTripped(state.clone()))
    }

    fn on_breaker_reset(&self, state: &CircuitBreakerState) -> ListenerResult {
        self.push(Event::BreakerReset(state.clone()))
    }

    fn on_breaker_disabled(&self, calibration_samples: usize) -> ListenerResult {
        self.push(Event::BreakerDisabled(calibration_samples))
    }

    fn on_phase_started(&self, phase: &StartupPhase) -> ListenerResult {
        self.push(Event::PhaseStarted(phase.name.clone()))
    }

    fn on_phase_ended(&self, phase: &StartupPhase) -> ListenerResult {
        self.push(Event::PhaseEnded(phase.name.clone()))
    }

    fn on_benchmark_completed(&self, benchmark: &Benchmark) -> ListenerResult {
        self.push(Event::BenchmarkCompleted(benchmark.clone()))
    }

    fn on_startup_complete(&self, profile: &StartupProfile) -> ListenerResult {
        self.push(Event::StartupComplete(profile.phases.len()))
    }
}

/// Monitor on a mock clock with a recording listener attached.
///
/// Built outside a runtime, the breaker calibrates synchronously and is
/// `Active` on return.
pub fn mock_monitor(
    config: MonitorConfig,
) -> (PerformanceMonitor<MockClock>, MockClock, Arc<RecordingListener>) {
    init_tracing();
    let clock = MockClock::new();
    let monitor = PerformanceMonitor::with_clock(config, clock.clone()).unwrap();
    let listener = RecordingListener::new();
    monitor.register_listener(listener.clone());
    (monitor, clock, listener)
}
