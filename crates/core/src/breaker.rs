//! Overhead circuit breaker
//!
//! A circuit breaker tripped by the cost of the monitoring itself. It first
//! calibrates a baseline by timing a fixed reference workload, then compares
//! instrumented work against that baseline. When the rolling overhead gets
//! too high the breaker trips and all metric collection stops until the
//! overhead falls back below half the threshold.
//!
//! ```text
//! Calibrating ──(enough samples)──▶ Active ◀──(avg < threshold/2)── Tripped
//!      │                              └──────(avg > threshold)──────▶ ▲
//!      └──(timeout, too few samples)──▶ Disabled (permanent)
//! ```
//!
//! ## Scheduling
//! [`OverheadCircuitBreaker::start`] drives the state machine with timers:
//! a calibration tick every `calibration_interval` (bounded by
//! `calibration_timeout`), then an overhead check every `check_interval`.
//! Tripping stops the fast check so the breaker's own polling does not add
//! to the overhead it flagged; a slower recovery check runs every
//! `recovery_interval` instead. Every transition is also reachable through
//! synchronous entry points (`record_calibration_sample`,
//! `finish_calibration`, `check_overhead`), which is how tests drive it.

use std::collections::VecDeque;
use std::fmt;
use std::hint::black_box;
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use perfguard_common::time::timer::{after, recurring, TimerHandle};
use perfguard_common::time::{Clock, SystemClock};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

pub use crate::config::BreakerConfig;
use crate::error::TelemetryResult;
use crate::events::ListenerRegistry;
use crate::utils::millis;

/// Number of most recent samples averaged by each check
pub const RECENT_SAMPLES: usize = 10;

const REFERENCE_ITERATIONS: u64 = 10_000;

/// Lifecycle of the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerPhase {
    /// Gathering baseline samples; collection is allowed
    Calibrating,
    /// Measuring overhead against the baseline
    Active,
    /// Overhead too high; collection is off until it recovers
    Tripped,
    /// Calibration failed; collection is off permanently
    Disabled,
}

impl fmt::Display for BreakerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Calibrating => write!(f, "CALIBRATING"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Tripped => write!(f, "TRIPPED"),
            Self::Disabled => write!(f, "DISABLED"),
        }
    }
}

/// Observable breaker state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CircuitBreakerState {
    /// Set while the breaker is `Tripped`
    pub is_tripped: bool,
    /// Average of the most recent samples at the last check
    pub overhead: f64,
    /// Epoch milliseconds of the last check
    pub last_check: Option<u64>,
    /// Epoch milliseconds of the current trip
    pub trip_time: Option<u64>,
    /// Collection is refused; mirrors `is_tripped`
    pub metrics_disabled: bool,
    /// Trips since creation; never reset
    pub trip_count: u64,
}

/// Transition produced by a check, applied after the state lock is released
enum Transition {
    Tripped(CircuitBreakerState),
    Reset(CircuitBreakerState),
}

struct BreakerCore {
    phase: BreakerPhase,
    enabled: bool,
    state: CircuitBreakerState,
    window: VecDeque<(f64, Instant)>,
    calibration: Vec<f64>,
    calibration_started: Option<Instant>,
    baseline_avg: f64,
}

impl BreakerCore {
    fn new() -> Self {
        Self {
            phase: BreakerPhase::Calibrating,
            enabled: true,
            state: CircuitBreakerState::default(),
            window: VecDeque::new(),
            calibration: Vec::new(),
            calibration_started: None,
            baseline_avg: 0.0,
        }
    }

    fn trip(&mut self, now_ms: u64) -> CircuitBreakerState {
        self.phase = BreakerPhase::Tripped;
        self.state.is_tripped = true;
        self.state.metrics_disabled = true;
        self.state.trip_time = Some(now_ms);
        self.state.trip_count += 1;
        self.state.clone()
    }

    fn reset(&mut self) -> CircuitBreakerState {
        self.phase = BreakerPhase::Active;
        self.state.is_tripped = false;
        self.state.metrics_disabled = false;
        self.state.trip_time = None;
        self.window.clear();
        self.state.clone()
    }

    fn prune(&mut self, now: Instant, window: std::time::Duration) {
        while let Some(&(_, stamped)) = self.window.front() {
            if now.saturating_duration_since(stamped) <= window {
                break;
            }
            self.window.pop_front();
        }
    }

    fn recent_average(&self) -> f64 {
        let take = self.window.len().min(RECENT_SAMPLES);
        if take == 0 {
            return 0.0;
        }
        self.window.iter().rev().take(take).map(|(overhead, _)| overhead).sum::<f64>() / take as f64
    }
}

#[derive(Default)]
struct BreakerTimers {
    /// Timers may be scheduled (started inside a tokio runtime)
    scheduling: bool,
    calibration: Option<TimerHandle>,
    calibration_timeout: Option<TimerHandle>,
    monitor: Option<TimerHandle>,
    recovery: Option<TimerHandle>,
}

impl BreakerTimers {
    fn cancel_all(&mut self) {
        for handle in [
            self.calibration.take(),
            self.calibration_timeout.take(),
            self.monitor.take(),
            self.recovery.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.cancel();
        }
    }
}

struct BreakerInner<C: Clock> {
    config: BreakerConfig,
    clock: C,
    core: Mutex<BreakerCore>,
    timers: Mutex<BreakerTimers>,
    listeners: ListenerRegistry,
}

impl<C: Clock> Drop for BreakerInner<C> {
    fn drop(&mut self) {
        self.timers.get_mut().cancel_all();
    }
}

/// Self-limiting gate for metric collection
///
/// Cloning is cheap and clones share state, like the other handles in this
/// crate.
pub struct OverheadCircuitBreaker<C: Clock = SystemClock> {
    inner: Arc<BreakerInner<C>>,
}

impl<C: Clock> Clone for OverheadCircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<C: Clock> fmt::Debug for OverheadCircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("OverheadCircuitBreaker")
            .field("phase", &core.phase)
            .field("baseline_avg", &core.baseline_avg)
            .field("state", &core.state)
            .finish()
    }
}

impl OverheadCircuitBreaker<SystemClock> {
    /// Breaker on the system clock with no listeners
    pub fn new(config: BreakerConfig) -> TelemetryResult<Self> {
        Self::with_clock(config, SystemClock, ListenerRegistry::new())
    }
}

impl<C: Clock> OverheadCircuitBreaker<C> {
    /// Create a breaker publishing transitions to `listeners`
    ///
    /// The breaker starts in `Calibrating`; nothing is scheduled until
    /// [`start`](Self::start).
    pub fn with_clock(
        config: BreakerConfig,
        clock: C,
        listeners: ListenerRegistry,
    ) -> TelemetryResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(BreakerInner {
                config,
                clock,
                core: Mutex::new(BreakerCore::new()),
                timers: Mutex::new(BreakerTimers::default()),
                listeners,
            }),
        })
    }

    fn from_weak(weak: &Weak<BreakerInner<C>>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Configuration the breaker was built with
    pub fn config(&self) -> &BreakerConfig {
        &self.inner.config
    }

    // =========================================================================
    // Gate
    // =========================================================================

    /// Whether metrics may be collected right now
    pub fn should_collect_metrics(&self) -> bool {
        let core = self.inner.core.lock();
        core.enabled && !core.state.is_tripped && !core.state.metrics_disabled
    }

    /// `false` once calibration failed; the breaker never re-enables
    pub fn is_enabled(&self) -> bool {
        self.inner.core.lock().enabled
    }

    /// Current state machine phase
    pub fn phase(&self) -> BreakerPhase {
        self.inner.core.lock().phase
    }

    /// Snapshot of the observable state
    pub fn state(&self) -> CircuitBreakerState {
        self.inner.core.lock().state.clone()
    }

    /// Mean duration of the reference workload in milliseconds
    pub fn baseline_avg(&self) -> f64 {
        self.inner.core.lock().baseline_avg
    }

    /// Overhead samples currently in the sliding window
    pub fn window_len(&self) -> usize {
        self.inner.core.lock().window.len()
    }

    // =========================================================================
    // Calibration
    // =========================================================================

    /// Time one run of the reference workload, in milliseconds
    pub fn time_reference_workload(&self) -> f64 {
        let start = self.inner.clock.now();
        black_box(reference_workload());
        millis(self.inner.clock.now().saturating_duration_since(start))
    }

    /// Add a baseline sample. Reaching `calibration_samples` finishes
    /// calibration. Ignored outside `Calibrating`.
    pub fn record_calibration_sample(&self, duration_ms: f64) -> BreakerPhase {
        let complete = {
            let mut core = self.inner.core.lock();
            if core.phase != BreakerPhase::Calibrating {
                return core.phase;
            }
            if core.calibration_started.is_none() {
                core.calibration_started = Some(self.inner.clock.now());
            }
            core.calibration.push(duration_ms.max(0.0));
            core.calibration.len() >= self.inner.config.calibration_samples
        };

        if complete {
            self.finish_calibration()
        } else {
            BreakerPhase::Calibrating
        }
    }

    /// End calibration with the samples gathered so far.
    ///
    /// Fewer than `min_calibration_samples` disables the breaker for good
    /// rather than trusting an unreliable baseline.
    pub fn finish_calibration(&self) -> BreakerPhase {
        let (phase, samples) = {
            let mut core = self.inner.core.lock();
            if core.phase != BreakerPhase::Calibrating {
                return core.phase;
            }

            let samples = core.calibration.len();
            if samples < self.inner.config.min_calibration_samples {
                core.phase = BreakerPhase::Disabled;
                core.enabled = false;
            } else {
                core.baseline_avg = core.calibration.iter().sum::<f64>() / samples as f64;
                core.phase = BreakerPhase::Active;
            }
            (core.phase, samples)
        };

        {
            let mut timers = self.inner.timers.lock();
            for handle in [timers.calibration.take(), timers.calibration_timeout.take()]
                .into_iter()
                .flatten()
            {
                handle.cancel();
            }
        }

        match phase {
            BreakerPhase::Disabled => {
                warn!(
                    samples,
                    required = self.inner.config.min_calibration_samples,
                    "Overhead calibration incomplete; disabling metric collection"
                );
                self.inner.timers.lock().cancel_all();
                self.inner
                    .listeners
                    .emit("breaker_disabled", |listener| listener.on_breaker_disabled(samples));
            }
            _ => {
                info!(
                    samples,
                    baseline_ms = self.baseline_avg(),
                    "Overhead calibration complete"
                );
                self.start_monitor();
            }
        }
        phase
    }

    /// One scheduled calibration step; returns `false` once calibration is over
    fn calibration_tick(&self) -> bool {
        let timed_out = {
            let core = self.inner.core.lock();
            if core.phase != BreakerPhase::Calibrating {
                return false;
            }
            core.calibration_started.is_some_and(|started| {
                self.inner.clock.now().saturating_duration_since(started)
                    >= self.inner.config.calibration_timeout
            })
        };
        if timed_out {
            self.finish_calibration();
            return false;
        }

        let sample = self.time_reference_workload();
        self.record_calibration_sample(sample) == BreakerPhase::Calibrating
    }

    // =========================================================================
    // Measurement
    // =========================================================================

    /// Run `op` and measure its overhead relative to the baseline.
    ///
    /// `op` always runs. Outside `Active` (calibrating, tripped, disabled)
    /// the overhead is reported as `0.0` and the window is left untouched.
    /// Otherwise overhead is `max(0, (duration - baseline) / baseline)`, or
    /// the raw duration in milliseconds when the baseline is not positive.
    pub fn measure_overhead<T>(&self, op: impl FnOnce() -> T) -> (T, f64) {
        let start = self.inner.clock.now();
        let output = op();
        let now = self.inner.clock.now();
        let duration = millis(now.saturating_duration_since(start));

        let mut core = self.inner.core.lock();
        if core.phase != BreakerPhase::Active {
            return (output, 0.0);
        }

        let overhead = if core.baseline_avg > 0.0 {
            ((duration - core.baseline_avg) / core.baseline_avg).max(0.0)
        } else {
            duration
        };
        core.window.push_back((overhead, now));
        core.prune(now, self.inner.config.sampling_window);

        (output, overhead)
    }

    /// Append an externally measured overhead sample.
    ///
    /// Accepted in every phase except `Disabled`, so a tripped breaker can
    /// be fed fresh readings.
    pub fn record_overhead_sample(&self, overhead: f64) {
        if !overhead.is_finite() {
            return;
        }
        let now = self.inner.clock.now();
        let mut core = self.inner.core.lock();
        if core.phase == BreakerPhase::Disabled {
            return;
        }
        core.window.push_back((overhead.max(0.0), now));
        core.prune(now, self.inner.config.sampling_window);
    }

    // =========================================================================
    // Monitoring
    // =========================================================================

    /// Average the most recent samples and apply the hysteretic transition:
    /// trip above `overhead_threshold`, reset below half of it.
    ///
    /// A no-op while calibrating or disabled. Returns the phase afterwards.
    pub fn check_overhead(&self) -> BreakerPhase {
        let threshold = self.inner.config.overhead_threshold;
        let (transition, phase) = {
            let mut core = self.inner.core.lock();
            if matches!(core.phase, BreakerPhase::Calibrating | BreakerPhase::Disabled) {
                return core.phase;
            }

            let now = self.inner.clock.now();
            core.prune(now, self.inner.config.sampling_window);
            let average = core.recent_average();
            let now_ms = self.inner.clock.millis_since_epoch();
            core.state.overhead = average;
            core.state.last_check = Some(now_ms);

            let transition = match core.phase {
                BreakerPhase::Active if average > threshold => {
                    Some(Transition::Tripped(core.trip(now_ms)))
                }
                BreakerPhase::Tripped if average < threshold / 2.0 => {
                    Some(Transition::Reset(core.reset()))
                }
                _ => None,
            };
            (transition, core.phase)
        };

        if let Some(transition) = transition {
            self.apply(transition);
        }
        phase
    }

    /// Trip manually. Returns `false` unless the breaker was `Active`.
    pub fn trip_breaker(&self, reason: &str) -> bool {
        let state = {
            let mut core = self.inner.core.lock();
            if core.phase != BreakerPhase::Active {
                return false;
            }
            core.trip(self.inner.clock.millis_since_epoch())
        };
        debug!(reason, "Manual breaker trip");
        self.apply(Transition::Tripped(state));
        true
    }

    /// Reset manually. Returns `false` unless the breaker was `Tripped`.
    pub fn reset_breaker(&self) -> bool {
        let state = {
            let mut core = self.inner.core.lock();
            if core.phase != BreakerPhase::Tripped {
                return false;
            }
            core.reset()
        };
        self.apply(Transition::Reset(state));
        true
    }

    fn apply(&self, transition: Transition) {
        match transition {
            Transition::Tripped(state) => {
                warn!(
                    overhead = state.overhead,
                    threshold = self.inner.config.overhead_threshold,
                    trip_count = state.trip_count,
                    "Overhead circuit breaker tripped; metric collection paused"
                );
                if let Some(monitor) = self.inner.timers.lock().monitor.take() {
                    monitor.cancel();
                }
                self.start_recovery();
                self.inner.listeners.emit("breaker_tripped", |l| l.on_breaker_tripped(&state));
            }
            Transition::Reset(state) => {
                info!(
                    overhead = state.overhead,
                    trip_count = state.trip_count,
                    "Overhead circuit breaker reset; metric collection resumed"
                );
                if let Some(recovery) = self.inner.timers.lock().recovery.take() {
                    recovery.cancel();
                }
                self.start_monitor();
                self.inner.listeners.emit("breaker_reset", |l| l.on_breaker_reset(&state));
            }
        }
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Begin calibration and, once calibrated, periodic overhead checks.
    ///
    /// Inside a tokio runtime calibration runs on a timer. Without one the
    /// reference workload is timed `calibration_samples` times right away
    /// and no periodic checks are scheduled; `check_overhead` can still be
    /// called directly. Calling `start` again is a no-op.
    pub fn start(&self) {
        {
            let mut core = self.inner.core.lock();
            if core.phase != BreakerPhase::Calibrating || core.calibration_started.is_some() {
                return;
            }
            core.calibration_started = Some(self.inner.clock.now());
        }

        if Handle::try_current().is_err() {
            debug!("No tokio runtime; calibrating overhead baseline synchronously");
            for _ in 0..self.inner.config.calibration_samples {
                let sample = self.time_reference_workload();
                if self.record_calibration_sample(sample) != BreakerPhase::Calibrating {
                    break;
                }
            }
            self.finish_calibration();
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let tick = recurring(self.inner.config.calibration_interval, move || {
            Self::from_weak(&weak).is_some_and(|breaker| breaker.calibration_tick())
        });

        let weak = Arc::downgrade(&self.inner);
        let timeout = after(self.inner.config.calibration_timeout, move || {
            if let Some(breaker) = Self::from_weak(&weak) {
                breaker.finish_calibration();
            }
        });

        let mut timers = self.inner.timers.lock();
        timers.scheduling = true;
        timers.calibration = Some(tick);
        timers.calibration_timeout = Some(timeout);
    }

    /// Cancel every breaker timer. Safe to call repeatedly.
    pub fn stop(&self) {
        let mut timers = self.inner.timers.lock();
        timers.scheduling = false;
        timers.cancel_all();
    }

    fn start_monitor(&self) {
        let mut timers = self.inner.timers.lock();
        if !timers.scheduling {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let handle = recurring(self.inner.config.check_interval, move || {
            Self::from_weak(&weak).is_some_and(|breaker| {
                breaker.check_overhead() == BreakerPhase::Active
            })
        });
        if let Some(previous) = timers.monitor.replace(handle) {
            previous.cancel();
        }
    }

    fn start_recovery(&self) {
        let mut timers = self.inner.timers.lock();
        if !timers.scheduling {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let handle = recurring(self.inner.config.recovery_interval, move || {
            Self::from_weak(&weak).is_some_and(|breaker| {
                breaker.check_overhead() == BreakerPhase::Tripped
            })
        });
        if let Some(previous) = timers.recovery.replace(handle) {
            previous.cancel();
        }
    }
}

/// Constant-size CPU loop used as the calibration baseline
pub fn reference_workload() -> u64 {
    let mut acc: u64 = 0;
    for i in 0..REFERENCE_ITERATIONS {
        acc = acc.wrapping_mul(31).wrapping_add(black_box(i));
    }
    acc
}
