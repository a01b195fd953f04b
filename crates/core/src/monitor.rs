//! Host-facing telemetry facade
//!
//! [`PerformanceMonitor`] wires the components together. Every recorded
//! point passes the overhead breaker's gate first. Accepted points are
//! pushed to the raw point store, then checked against thresholds and
//! folded into their series.
//!
//! ## Deferred processing
//! With `deferred_processing` enabled and a tokio runtime available, points
//! whose names are not in `critical_metrics` are queued to a worker task
//! instead of being processed on the caller's thread. The worker holds only
//! a weak reference to the monitor. [`PerformanceMonitor::flush`] waits for
//! the queue to drain and [`PerformanceMonitor::destroy`] drains it before
//! clearing state.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use perfguard_common::collections::{RingStoreConfig, SharedRingStore};
use perfguard_common::time::{Clock, SystemClock};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::alerts::{Alert, AlertLevel, Threshold, ThresholdAlerter};
use crate::benchmark::{Benchmark, BenchmarkTracker};
use crate::breaker::{BreakerPhase, CircuitBreakerState, OverheadCircuitBreaker};
use crate::config::MonitorConfig;
use crate::error::TelemetryResult;
use crate::events::{ListenerRegistry, TelemetryListener};
use crate::metrics::{
    aggregate_by_time, Metadata, MetricPoint, MetricQuery, MetricSeries, Tags,
    TimeSeriesAggregator,
};
use crate::startup::{
    PhaseOptions, StartupPhase, StartupPhaseTracker, StartupProfile, StartupReport,
};
use crate::utils::millis;

/// Point-in-time counters for the whole monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStats {
    pub stored_points: usize,        // Raw point store
    pub series_count: usize,         // Distinct metric names
    pub series_points: usize,        // Points retained across all series
    pub alert_count: usize,          // Alert history
    pub active_benchmarks: usize,    // Started, not yet ended
    pub completed_benchmarks: usize, // Completed history
    pub breaker_phase: BreakerPhase,
    pub breaker: CircuitBreakerState,
}

enum Deferred {
    Point(MetricPoint),
    Flush(oneshot::Sender<()>),
}

struct DeferredQueue {
    sender: mpsc::UnboundedSender<Deferred>,
    worker: JoinHandle<()>,
}

struct MonitorState<C: Clock + Clone> {
    aggregator: TimeSeriesAggregator<C>,
    alerter: ThresholdAlerter<C>,
    benchmarks: BenchmarkTracker<C>,
}

struct MonitorInner<C: Clock + Clone> {
    config: MonitorConfig,
    clock: C,
    store: SharedRingStore<MetricPoint, C>,
    state: Mutex<MonitorState<C>>,
    breaker: OverheadCircuitBreaker<C>,
    startup: Mutex<StartupPhaseTracker<C>>,
    listeners: ListenerRegistry,
    deferred: Mutex<Option<DeferredQueue>>,
    destroyed: AtomicBool,
    /// Shared by in-flight `record` calls, exclusive while `destroy` begins
    teardown: RwLock<()>,
}

impl<C: Clock + Clone> MonitorInner<C> {
    /// Ingest one accepted point. The time spent here is the monitor's own
    /// cost and is what the breaker's overhead window tracks.
    fn process(&self, point: MetricPoint) {
        let ((), _overhead) = self.breaker.measure_overhead(|| self.ingest(point));
    }

    fn ingest(&self, point: MetricPoint) {
        self.store.push(point.clone());

        let alert = {
            let mut state = self.state.lock();
            let alert = state.alerter.check_metric(&point);
            if let Err(err) = state.aggregator.record(point) {
                warn!(error = %err, "Failed to aggregate metric point");
            }
            alert
        };

        if let Some(alert) = alert {
            self.listeners.emit("alert", |listener| listener.on_alert(&alert));
        }
    }
}

impl<C: Clock + Clone> Drop for MonitorInner<C> {
    fn drop(&mut self) {
        self.breaker.stop();
    }
}

/// In-process performance telemetry core
///
/// Cloning is cheap; clones share all state. Listener callbacks run while
/// the emitting component is locked and must not call back into the
/// monitor.
///
/// # Examples
///
/// ```
/// use perfguard_core::{AlertLevel, MonitorConfig, PerformanceMonitor, Threshold};
///
/// let monitor = PerformanceMonitor::new(MonitorConfig::default()).unwrap();
/// monitor.add_threshold(Threshold::above("render.time", 50.0, 75.0)).unwrap();
///
/// for value in [60.0, 80.0, 30.0] {
///     monitor.record("render.time", value, None, None);
/// }
///
/// assert_eq!(monitor.alerts(None).len(), 2);
/// assert_eq!(monitor.alerts(Some(AlertLevel::Critical)).len(), 1);
/// ```
pub struct PerformanceMonitor<C: Clock + Clone = SystemClock> {
    inner: Arc<MonitorInner<C>>,
}

impl<C: Clock + Clone> Clone for PerformanceMonitor<C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<C: Clock + Clone> fmt::Debug for PerformanceMonitor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerformanceMonitor")
            .field("enabled", &self.inner.config.enabled)
            .field("destroyed", &self.is_destroyed())
            .field("breaker", &self.inner.breaker)
            .finish_non_exhaustive()
    }
}

impl PerformanceMonitor<SystemClock> {
    /// Monitor on the system clock; see [`with_clock`](Self::with_clock)
    pub fn new(config: MonitorConfig) -> TelemetryResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock + Clone> PerformanceMonitor<C> {
    /// Build every component and start background work.
    ///
    /// # Errors
    /// Returns `InvalidConfig` or `InvalidCapacity` when the configuration
    /// fails validation. Nothing is started in that case.
    pub fn with_clock(config: MonitorConfig, clock: C) -> TelemetryResult<Self> {
        config.validate()?;

        let listeners = ListenerRegistry::new();
        let store = SharedRingStore::with_clock(
            RingStoreConfig::new(config.store.capacity).with_max_age(config.store.max_age),
            clock.clone(),
        )?;
        let state = MonitorState {
            aggregator: TimeSeriesAggregator::with_clock(
                config.aggregator.max_points_per_series,
                clock.clone(),
            )?,
            alerter: ThresholdAlerter::with_clock(config.alerts.max_alerts, clock.clone())?,
            benchmarks: BenchmarkTracker::with_clock(
                config.benchmarks.max_completed,
                clock.clone(),
            )?,
        };
        let breaker = OverheadCircuitBreaker::with_clock(
            config.breaker.clone(),
            clock.clone(),
            listeners.clone(),
        )?;
        let startup = StartupPhaseTracker::with_clock(
            config.startup.clone(),
            clock.clone(),
            listeners.clone(),
        )?;

        let inner = Arc::new(MonitorInner {
            config,
            clock,
            store,
            state: Mutex::new(state),
            breaker,
            startup: Mutex::new(startup),
            listeners,
            deferred: Mutex::new(None),
            destroyed: AtomicBool::new(false),
            teardown: RwLock::new(()),
        });

        let runtime = Handle::try_current().ok();
        if inner.config.enabled {
            if runtime.is_some() {
                inner.store.start_cleanup(inner.config.store.cleanup_interval);
            }
            inner.breaker.start();
        }

        if inner.config.deferred_processing {
            match &runtime {
                Some(runtime) => {
                    let (sender, receiver) = mpsc::unbounded_channel();
                    let worker = runtime.spawn(run_deferred(Arc::downgrade(&inner), receiver));
                    *inner.deferred.lock() = Some(DeferredQueue { sender, worker });
                }
                None => debug!("No tokio runtime; deferred processing disabled"),
            }
        }

        info!(
            enabled = inner.config.enabled,
            capacity = inner.config.store.capacity,
            deferred = inner.deferred.lock().is_some(),
            "Performance monitor started"
        );
        Ok(Self { inner })
    }

    /// Configuration the monitor was built with
    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    /// The breaker gating collection, for inspection and manual control
    pub fn breaker(&self) -> &OverheadCircuitBreaker<C> {
        &self.inner.breaker
    }

    /// Whether [`destroy`](Self::destroy) has been called
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Whether a call to [`record`](Self::record) would be accepted
    pub fn should_collect(&self) -> bool {
        self.inner.config.enabled
            && !self.is_destroyed()
            && self.inner.breaker.should_collect_metrics()
    }

    /// Subscribe `listener` to alerts, breaker transitions, phases and benchmarks
    pub fn register_listener(&self, listener: Arc<dyn TelemetryListener>) {
        self.inner.listeners.register(listener);
    }

    // =========================================================================
    // Recording
    // =========================================================================

    /// Record one measurement.
    ///
    /// Returns `false` if the point was dropped: the monitor is disabled or
    /// destroyed, the breaker refuses collection, or `value` is not finite.
    pub fn record(
        &self,
        name: impl Into<String>,
        value: f64,
        tags: Option<Tags>,
        metadata: Option<Metadata>,
    ) -> bool {
        if !self.should_collect() {
            return false;
        }

        let name = name.into();
        if !value.is_finite() {
            warn!(metric = %name, value, "Dropping non-finite metric value");
            return false;
        }

        let mut point = MetricPoint::new(name, value, self.inner.clock.millis_since_epoch());
        if let Some(tags) = tags {
            point = point.with_tags(tags);
        }
        if let Some(metadata) = metadata {
            point = point.with_metadata(metadata);
        }

        // Held until the point is queued or processed so `destroy` cannot
        // clear state underneath it. Recursive so alert listeners may record.
        let _teardown = self.inner.teardown.read_recursive();
        if self.is_destroyed() {
            return false;
        }
        if !self.inner.config.is_critical(&point.name) {
            if let Some(queue) = self.inner.deferred.lock().as_ref() {
                if queue.sender.send(Deferred::Point(point)).is_err() {
                    warn!("Deferred worker stopped; metric point dropped");
                    return false;
                }
                return true;
            }
        }

        self.inner.process(point);
        true
    }

    /// Run `op` and record its duration under `name`.
    ///
    /// Only the recording that follows counts towards the breaker's
    /// overhead; the time spent in `op` is the host's.
    pub fn measure<T>(&self, name: &str, op: impl FnOnce() -> T) -> T {
        let start = self.inner.clock.now();
        let output = op();
        let elapsed = millis(self.inner.clock.now().saturating_duration_since(start));
        self.record(name, elapsed, None, None);
        output
    }

    /// Wait until every point queued before this call has been processed.
    ///
    /// Returns immediately when deferred processing is off.
    pub async fn flush(&self) {
        let done = {
            let queue = self.inner.deferred.lock();
            let Some(queue) = queue.as_ref() else {
                return;
            };
            let (done, wait) = oneshot::channel();
            if queue.sender.send(Deferred::Flush(done)).is_err() {
                return;
            }
            wait
        };
        let _ = done.await;
    }

    /// Raw points still in the store, oldest first
    pub fn points(&self) -> Vec<MetricPoint> {
        self.inner.store.to_vec()
    }

    // =========================================================================
    // Benchmarks
    // =========================================================================

    /// Open a benchmark and return its id
    pub fn start_benchmark(
        &self,
        name: impl Into<String>,
        category: Option<&str>,
        metadata: Option<Metadata>,
    ) -> String {
        self.inner.state.lock().benchmarks.start(name, category, metadata)
    }

    /// Close a benchmark and record its duration as
    /// `benchmark.<category>.<name>`, tagged with its category
    pub fn end_benchmark(&self, id: &str) -> Option<Benchmark> {
        let benchmark = self.inner.state.lock().benchmarks.end(id)?;

        if let Some(duration) = benchmark.duration_ms {
            let tags = Tags::from([("category".to_string(), benchmark.category.clone())]);
            self.record(benchmark.metric_name(), duration, Some(tags), None);
        }
        self.inner
            .listeners
            .emit("benchmark_completed", |listener| listener.on_benchmark_completed(&benchmark));
        Some(benchmark)
    }

    /// Run `op` inside a benchmark
    pub fn measure_benchmark<T>(
        &self,
        name: impl Into<String>,
        category: Option<&str>,
        op: impl FnOnce() -> T,
    ) -> (T, Option<Benchmark>) {
        let id = self.start_benchmark(name, category, None);
        let output = op();
        (output, self.end_benchmark(&id))
    }

    /// Completed benchmarks, oldest first, optionally for one category
    pub fn benchmarks(&self, category: Option<&str>) -> Vec<Benchmark> {
        self.inner.state.lock().benchmarks.completed(category)
    }

    // =========================================================================
    // Thresholds and alerts
    // =========================================================================

    /// Add or replace the threshold for `threshold.metric`
    pub fn add_threshold(&self, threshold: Threshold) -> TelemetryResult<()> {
        self.inner.state.lock().alerter.add_threshold(threshold)
    }

    /// Returns `true` if a threshold for `metric` was removed
    pub fn remove_threshold(&self, metric: &str) -> bool {
        self.inner.state.lock().alerter.remove_threshold(metric)
    }

    /// Registered thresholds, ordered by metric name
    pub fn thresholds(&self) -> Vec<Threshold> {
        self.inner.state.lock().alerter.thresholds()
    }

    /// Stored alerts, oldest first, optionally for one level
    pub fn alerts(&self, level: Option<AlertLevel>) -> Vec<Alert> {
        self.inner.state.lock().alerter.alerts(level)
    }

    /// Drop the alert history, keeping thresholds
    pub fn clear_alerts(&self) {
        self.inner.state.lock().alerter.clear_alerts();
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Series matching `query`, ordered by name
    pub fn query(&self, query: &MetricQuery) -> Vec<MetricSeries> {
        self.inner.state.lock().aggregator.query(query)
    }

    /// Snapshot of the series `name`
    pub fn series(&self, name: &str) -> Option<MetricSeries> {
        self.inner.state.lock().aggregator.series(name)
    }

    /// Bucket the retained points of series `name` into `interval_ms` windows
    pub fn aggregate_by_time(&self, name: &str, interval_ms: u64) -> Vec<MetricPoint> {
        self.series(name)
            .map(|series| aggregate_by_time(&series.points, interval_ms))
            .unwrap_or_default()
    }

    // =========================================================================
    // Startup
    // =========================================================================

    /// Open a startup phase; see [`StartupPhaseTracker::start_phase`]
    pub fn start_phase(&self, name: impl Into<String>, options: PhaseOptions) -> bool {
        self.inner.startup.lock().start_phase(name, options)
    }

    /// Close the open phase `name`; see [`StartupPhaseTracker::end_phase`]
    pub fn end_phase(&self, name: &str) -> Option<StartupPhase> {
        self.inner.startup.lock().end_phase(name)
    }

    /// Freeze the startup profile; later calls return the same profile
    pub fn complete_startup(&self) -> StartupProfile {
        self.inner.startup.lock().complete()
    }

    /// Statistics, bottlenecks, score and recommendations for startup
    pub fn generate_report(&self) -> StartupReport {
        self.inner.startup.lock().report()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Counters across every component
    pub fn stats(&self) -> MonitorStats {
        let (series_count, series_points, alert_count, active_benchmarks, completed_benchmarks) = {
            let state = self.inner.state.lock();
            (
                state.aggregator.series_count(),
                state.aggregator.total_points(),
                state.alerter.alert_count(),
                state.benchmarks.active_count(),
                state.benchmarks.completed_count(),
            )
        };

        MonitorStats {
            stored_points: self.inner.store.len(),
            series_count,
            series_points,
            alert_count,
            active_benchmarks,
            completed_benchmarks,
            breaker_phase: self.inner.breaker.phase(),
            breaker: self.inner.breaker.state(),
        }
    }

    /// Stop background work, drain queued points and clear all state.
    ///
    /// Later calls are no-ops. After destruction `record` always returns
    /// `false`.
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            debug!("Performance monitor already destroyed");
            return;
        }
        // Wait out records that passed the gate before `destroyed` was set.
        drop(self.inner.teardown.write());

        let queue = self.inner.deferred.lock().take();
        if let Some(DeferredQueue { sender, worker }) = queue {
            drop(sender);
            if let Err(err) = worker.await {
                warn!(error = %err, "Deferred worker ended abnormally");
            }
        }

        self.inner.breaker.stop();
        self.inner.store.stop_cleanup();
        self.inner.store.with(|store| store.clear());
        {
            let mut state = self.inner.state.lock();
            state.aggregator.clear();
            state.alerter.clear();
            state.benchmarks.clear();
        }
        self.inner.startup.lock().reset();
        self.inner.listeners.clear();

        info!("Performance monitor destroyed");
    }
}

async fn run_deferred<C: Clock + Clone>(
    monitor: Weak<MonitorInner<C>>,
    mut receiver: mpsc::UnboundedReceiver<Deferred>,
) {
    while let Some(message) = receiver.recv().await {
        match message {
            Deferred::Point(point) => {
                let Some(inner) = monitor.upgrade() else {
                    break;
                };
                inner.process(point);
            }
            Deferred::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Deferred worker stopped");
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use perfguard_common::time::MockClock;

    use super::*;
    use crate::metrics::TimeRange;

    fn monitor(config: MonitorConfig) -> PerformanceMonitor<MockClock> {
        PerformanceMonitor::with_clock(config, MockClock::new()).unwrap()
    }

    /// Validates recorded points reach the store, aggregator and alerter.
    ///
    /// Assertions:
    /// - Confirms the store and the series both hold three points.
    /// - Confirms two alerts: Warning for 60 and Critical for 80.
    #[test]
    fn test_record_pipeline() {
        let monitor = monitor(MonitorConfig::default());
        monitor.add_threshold(Threshold::above("render.time", 50.0, 75.0)).unwrap();

        for value in [60.0, 80.0, 30.0] {
            assert!(monitor.record("render.time", value, None, None));
        }

        assert_eq!(monitor.points().len(), 3);
        let series = monitor.series("render.time").unwrap();
        assert_eq!(series.aggregations.count, 3);
        assert_eq!(series.aggregations.max, 80.0);

        let alerts = monitor.alerts(None);
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].level, AlertLevel::Warning);
        assert_eq!(alerts[0].value, 60.0);
        assert_eq!(alerts[1].level, AlertLevel::Critical);
        assert_eq!(alerts[1].value, 80.0);
    }

    /// Validates the breaker gate drops points while tripped.
    #[test]
    fn test_tripped_breaker_blocks_record() {
        let monitor = monitor(MonitorConfig::default());
        assert_eq!(monitor.breaker().phase(), BreakerPhase::Active);

        assert!(monitor.breaker().trip_breaker("test"));
        assert!(!monitor.should_collect());
        assert!(!monitor.record("m", 1.0, None, None));
        assert_eq!(monitor.stats().stored_points, 0);

        assert!(monitor.breaker().reset_breaker());
        assert!(monitor.record("m", 1.0, None, None));
    }

    #[test]
    fn test_disabled_monitor_drops_everything() {
        let config = MonitorConfig { enabled: false, ..MonitorConfig::default() };
        let monitor = monitor(config);
        assert!(!monitor.record("m", 1.0, None, None));
        assert_eq!(monitor.breaker().phase(), BreakerPhase::Calibrating);
    }

    #[test]
    fn test_non_finite_values_rejected() {
        let monitor = monitor(MonitorConfig::default());
        assert!(!monitor.record("m", f64::NAN, None, None));
        assert!(!monitor.record("m", f64::INFINITY, None, None));
        assert!(monitor.points().is_empty());
    }

    /// Validates tags and time ranges flow through `query`.
    #[test]
    fn test_query_through_facade() {
        let clock = MockClock::new();
        let monitor =
            PerformanceMonitor::with_clock(MonitorConfig::default(), clock.clone()).unwrap();
        let tags = Tags::from([("screen".to_string(), "home".to_string())]);

        monitor.record("api.latency", 10.0, Some(tags.clone()), None);
        clock.advance_millis(1000);
        monitor.record("api.latency", 20.0, Some(tags), None);
        monitor.record("db.latency", 5.0, None, None);

        let by_tag = monitor.query(&MetricQuery::new().tag("screen", "home"));
        assert_eq!(by_tag.len(), 1);
        assert_eq!(by_tag[0].name, "api.latency");

        let recent_query =
            MetricQuery::new().name("latency").time_range(TimeRange::new(1000, 2000));
        let recent = monitor.query(&recent_query);
        assert_eq!(recent.len(), 2);
        assert!(recent.iter().all(|series| series.points.len() == 1));

        let buckets = monitor.aggregate_by_time("api.latency", 1000);
        assert_eq!(buckets.len(), 2);
        assert!(monitor.aggregate_by_time("unknown", 1000).is_empty());
    }

    /// Validates a benchmark is recorded as a categorised metric.
    ///
    /// Assertions:
    /// - Confirms the metric name is `benchmark.<category>.<name>`.
    /// - Confirms the `category` tag and recorded duration.
    #[test]
    fn test_benchmark_records_metric() {
        let clock = MockClock::new();
        let monitor =
            PerformanceMonitor::with_clock(MonitorConfig::default(), clock.clone()).unwrap();

        let id = monitor.start_benchmark("load", Some("io"), None);
        clock.advance_millis(12);
        let benchmark = monitor.end_benchmark(&id).unwrap();
        assert_eq!(benchmark.duration_ms, Some(12.0));
        assert!(monitor.end_benchmark(&id).is_none());

        let series = monitor.series("benchmark.io.load").unwrap();
        assert_eq!(series.aggregations.latest, 12.0);
        assert_eq!(series.tags.get("category").map(String::as_str), Some("io"));
        assert_eq!(monitor.benchmarks(Some("io")).len(), 1);
    }

    /// Validates `measure` runs the op and records its duration.
    ///
    /// Only the recording reaches the overhead window, as a zero sample.
    #[test]
    fn test_measure_records_duration() {
        let clock = MockClock::new();
        let monitor =
            PerformanceMonitor::with_clock(MonitorConfig::default(), clock.clone()).unwrap();

        let op_clock = clock.clone();
        let value = monitor.measure("work", || {
            op_clock.advance_millis(4);
            "ok"
        });

        assert_eq!(value, "ok");
        assert_eq!(monitor.series("work").unwrap().aggregations.latest, 4.0);
        assert_eq!(monitor.breaker().window_len(), 1);
        assert_eq!(monitor.breaker().check_overhead(), BreakerPhase::Active);
    }

    /// Validates every processed point adds one overhead sample.
    #[test]
    fn test_record_feeds_overhead_window() {
        let monitor = monitor(MonitorConfig::default());
        for value in 0..25 {
            assert!(monitor.record("m", f64::from(value), None, None));
        }
        assert_eq!(monitor.breaker().window_len(), 25);

        assert!(!monitor.record("m", f64::NAN, None, None));
        assert_eq!(monitor.breaker().window_len(), 25);
    }

    /// Validates critical metrics bypass the deferred queue.
    #[tokio::test]
    async fn test_deferred_and_critical_paths() {
        let config = MonitorConfig {
            deferred_processing: true,
            critical_metrics: BTreeSet::from(["frame.drop".to_string()]),
            ..MonitorConfig::default()
        };
        let monitor = monitor(config);

        assert!(monitor.record("frame.drop", 1.0, None, None));
        assert!(monitor.series("frame.drop").is_some());

        for value in 0..20 {
            assert!(monitor.record("bulk", f64::from(value), None, None));
        }
        monitor.flush().await;
        assert_eq!(monitor.series("bulk").unwrap().aggregations.count, 20);

        monitor.destroy().await;
    }

    /// Validates destroy drains queued points, clears state and is idempotent.
    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let config = MonitorConfig { deferred_processing: true, ..MonitorConfig::default() };
        let monitor = monitor(config);
        monitor.add_threshold(Threshold::above("m", 1.0, 2.0)).unwrap();
        monitor.record("m", 5.0, None, None);
        monitor.start_phase("boot", PhaseOptions::default());

        monitor.destroy().await;
        monitor.destroy().await;

        let stats = monitor.stats();
        assert_eq!(stats.stored_points, 0);
        assert_eq!(stats.series_count, 0);
        assert_eq!(stats.alert_count, 0);
        assert!(monitor.is_destroyed());
        assert!(!monitor.record("m", 5.0, None, None));
        assert!(monitor.thresholds().is_empty());
    }

    /// Validates a point racing `destroy` cannot repopulate cleared state.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_record_racing_destroy_leaves_no_state() {
        let monitor = monitor(MonitorConfig::default());
        let stop = Arc::new(AtomicBool::new(false));

        let writer = {
            let monitor = monitor.clone();
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    monitor.record("m", 1.0, None, None);
                }
            })
        };
        while monitor.points().is_empty() {
            tokio::task::yield_now().await;
        }

        monitor.destroy().await;
        stop.store(true, Ordering::SeqCst);
        writer.join().unwrap();

        let stats = monitor.stats();
        assert_eq!(stats.stored_points, 0);
        assert_eq!(stats.series_count, 0);
        assert!(monitor.series("m").is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = MonitorConfig::default();
        config.store.capacity = 0;
        assert!(PerformanceMonitor::with_clock(config, MockClock::new()).is_err());
    }
}
