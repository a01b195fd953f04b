//! Integration tests for the overhead circuit breaker
//!
//! Covers the hysteretic trip/reset cycle, what the monitor feeds into the
//! overhead window, degraded mode and the timer-driven loops.

mod support;

use std::sync::Arc;
use std::time::Duration;

use perfguard_common::time::{MockClock, SystemClock};
use perfguard_core::events::ListenerResult;
use perfguard_core::{
    Alert, BreakerConfig, BreakerPhase, ListenerRegistry, MonitorConfig, OverheadCircuitBreaker,
    PerformanceMonitor, TelemetryListener, Threshold,
};
use support::{init_tracing, mock_monitor, Event, RecordingListener};

fn calibrated_breaker() -> (OverheadCircuitBreaker<MockClock>, MockClock, Arc<RecordingListener>) {
    init_tracing();
    let clock = MockClock::new();
    let listeners = ListenerRegistry::new();
    let listener = RecordingListener::new();
    listeners.register(listener.clone());

    let breaker =
        OverheadCircuitBreaker::with_clock(BreakerConfig::default(), clock.clone(), listeners)
            .unwrap();
    for _ in 0..10 {
        breaker.record_calibration_sample(2.0);
    }
    assert_eq!(breaker.phase(), BreakerPhase::Active);
    (breaker, clock, listener)
}

fn feed(breaker: &OverheadCircuitBreaker<MockClock>, overhead: f64) {
    for _ in 0..10 {
        breaker.record_overhead_sample(overhead);
    }
}

/// Validates the hysteresis band with the default 0.02 threshold.
///
/// # Test Steps
/// 1. Push the rolling average to 0.05 and check: trips
/// 2. Hold the average at 0.015 (between 0.01 and 0.02): stays tripped
/// 3. Drop the average to 0.005: resets
/// 4. Verify listeners saw exactly one trip followed by one reset
#[test]
fn test_hysteresis_cycle() {
    let (breaker, _clock, listener) = calibrated_breaker();

    feed(&breaker, 0.05);
    assert_eq!(breaker.check_overhead(), BreakerPhase::Tripped);
    assert!(!breaker.should_collect_metrics());

    for _ in 0..5 {
        feed(&breaker, 0.015);
        assert_eq!(breaker.check_overhead(), BreakerPhase::Tripped);
    }

    feed(&breaker, 0.005);
    assert_eq!(breaker.check_overhead(), BreakerPhase::Active);
    assert!(breaker.should_collect_metrics());

    let transitions: Vec<_> = listener
        .events()
        .into_iter()
        .filter(|event| matches!(event, Event::BreakerTripped(_) | Event::BreakerReset(_)))
        .collect();
    assert_eq!(transitions.len(), 2);
    assert!(matches!(&transitions[0], Event::BreakerTripped(state) if state.trip_count == 1));
    assert!(matches!(&transitions[1], Event::BreakerReset(state) if !state.is_tripped));
}

/// Validates measured overhead feeds the same window the check reads.
///
/// Operations running at 1.5x the 2ms baseline average 0.5 overhead, which
/// trips the breaker on the next check.
#[test]
fn test_measured_overhead_trips() {
    let (breaker, clock, _listener) = calibrated_breaker();

    for _ in 0..10 {
        let op_clock = clock.clone();
        let (_, overhead) = breaker.measure_overhead(|| op_clock.advance_millis(3));
        assert!((overhead - 0.5).abs() < 1e-9);
    }

    assert_eq!(breaker.check_overhead(), BreakerPhase::Tripped);
    assert!((breaker.state().overhead - 0.5).abs() < 1e-9);
}

/// Validates the overhead window tracks the monitor's own recording cost and
/// ignores the duration of the host work handed to `measure`.
///
/// The mock clock leaves the calibrated baseline at zero, so every sample is
/// the raw ingestion time in milliseconds.
#[test]
fn test_slow_host_work_does_not_trip() {
    let (monitor, clock, _listener) = mock_monitor(MonitorConfig::default());

    for _ in 0..10 {
        let op_clock = clock.clone();
        monitor.measure("db.query", || op_clock.advance_millis(50));
    }

    assert_eq!(monitor.breaker().window_len(), 10);
    assert_eq!(monitor.breaker().check_overhead(), BreakerPhase::Active);
    assert_eq!(monitor.breaker().state().overhead, 0.0);
    assert_eq!(monitor.series("db.query").unwrap().aggregations.max, 50.0);
    assert!(monitor.record("db.query", 1.0, None, None));
}

/// Alert sink that costs 5ms of mock time per delivery
struct SlowSink(MockClock);

impl TelemetryListener for SlowSink {
    fn on_alert(&self, _alert: &Alert) -> ListenerResult {
        self.0.advance_millis(5);
        Ok(())
    }
}

/// Validates expensive ingestion trips the breaker through `record` alone.
///
/// # Test Steps
/// 1. Attach a listener that makes every alert delivery cost 5ms
/// 2. Record ten alerting points; each adds one overhead sample
/// 3. Verify the next check trips and recording stops
#[test]
fn test_costly_recording_trips() {
    let (monitor, clock, listener) = mock_monitor(MonitorConfig::default());
    monitor.register_listener(Arc::new(SlowSink(clock.clone())));
    monitor.add_threshold(Threshold::above("render.time", 10.0, 20.0)).unwrap();

    for _ in 0..10 {
        assert!(monitor.record("render.time", 15.0, None, None));
    }
    assert_eq!(monitor.breaker().window_len(), 10);

    assert_eq!(monitor.breaker().check_overhead(), BreakerPhase::Tripped);
    assert!(monitor.breaker().state().overhead >= 5.0);
    assert!(!monitor.record("render.time", 15.0, None, None));
    assert!(listener.events().iter().any(|event| matches!(event, Event::BreakerTripped(_))));
}

/// Validates the calibration safety valve fires on its own.
///
/// Ticks are a second apart, so the 20ms timeout expires before any sample
/// is taken and the breaker drops into degraded mode.
#[tokio::test]
async fn test_calibration_timeout_disables() {
    init_tracing();
    let config = BreakerConfig {
        calibration_interval: Duration::from_secs(1),
        calibration_timeout: Duration::from_millis(20),
        ..BreakerConfig::default()
    };
    let listeners = ListenerRegistry::new();
    let listener = RecordingListener::new();
    listeners.register(listener.clone());
    let breaker = OverheadCircuitBreaker::with_clock(config, SystemClock, listeners).unwrap();

    breaker.start();
    assert_eq!(breaker.phase(), BreakerPhase::Calibrating);

    wait_for(|| breaker.phase() == BreakerPhase::Disabled).await;
    assert!(!breaker.is_enabled());
    assert!(!breaker.should_collect_metrics());
    assert_eq!(listener.events(), vec![Event::BreakerDisabled(0)]);

    breaker.stop();
}

/// Validates a disabled breaker blocks the whole monitor.
///
/// Inside a runtime calibration runs on timers; finishing it before any tick
/// leaves zero samples, which is below the minimum of three.
#[tokio::test]
async fn test_disabled_breaker_blocks_monitor() {
    let monitor =
        PerformanceMonitor::with_clock(MonitorConfig::default(), MockClock::new()).unwrap();
    let listener = RecordingListener::new();
    monitor.register_listener(listener.clone());
    assert_eq!(monitor.breaker().phase(), BreakerPhase::Calibrating);
    assert!(monitor.record("m", 1.0, None, None));

    assert_eq!(monitor.breaker().finish_calibration(), BreakerPhase::Disabled);
    assert!(!monitor.breaker().is_enabled());
    assert!(!monitor.record("m", 1.0, None, None));
    assert!(listener.events().contains(&Event::BreakerDisabled(0)));

    monitor.destroy().await;
}

/// Validates the scheduled loops: calibration, the fast check that trips,
/// and the recovery check that resets once samples age out of the window.
///
/// # Test Steps
/// 1. Start with short intervals and wait for calibration
/// 2. Feed high overhead and wait for the check loop to trip
/// 3. Wait for the samples to leave the 200ms window
/// 4. Verify the recovery check resets the breaker
#[tokio::test(flavor = "multi_thread")]
async fn test_timer_driven_trip_and_recovery() {
    let config = BreakerConfig {
        check_interval: Duration::from_millis(10),
        recovery_interval: Duration::from_millis(20),
        sampling_window: Duration::from_millis(200),
        calibration_interval: Duration::from_millis(1),
        calibration_samples: 3,
        min_calibration_samples: 3,
        ..BreakerConfig::default()
    };
    let breaker = OverheadCircuitBreaker::new(config).unwrap();
    breaker.start();

    wait_for(|| breaker.phase() == BreakerPhase::Active).await;

    for _ in 0..10 {
        breaker.record_overhead_sample(1.0);
    }
    wait_for(|| breaker.state().trip_count == 1).await;
    assert!(breaker.state().trip_time.is_some());

    wait_for(|| breaker.phase() == BreakerPhase::Active).await;
    assert!(breaker.should_collect_metrics());
    assert_eq!(breaker.state().trip_count, 1);

    breaker.stop();
}

async fn wait_for(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}
