//! Configuration for the telemetry core
//!
//! Every section has documented defaults, so an empty TOML document is a
//! valid configuration. Durations are written as integer milliseconds.
//!
//! ```toml
//! deferred_processing = true
//! critical_metrics = ["frame.time"]
//!
//! [breaker]
//! overhead_threshold = 0.05
//! check_interval = 2000
//!
//! [startup.targets]
//! total_startup_time = 150
//! ```

use std::collections::BTreeSet;
use std::time::Duration;

use perfguard_common::duration_millis;
use serde::{Deserialize, Serialize};

use crate::error::{TelemetryError, TelemetryResult};

/// Top-level options for [`PerformanceMonitor`](crate::PerformanceMonitor)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Master switch; when `false` nothing is collected
    pub enabled: bool,
    pub store: StoreConfig,             // Raw point history
    pub aggregator: AggregatorConfig,   // Per-series history
    pub alerts: AlertConfig,            // Alert history
    pub benchmarks: BenchmarkConfig,    // Completed benchmark history
    pub breaker: BreakerConfig,         // Overhead gate
    pub startup: StartupConfig,         // Startup profiling
    /// Metrics always processed on the recording call, never deferred
    pub critical_metrics: BTreeSet<String>,
    /// Route non-critical metrics through the background worker
    pub deferred_processing: bool,
}

/// Global point history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub capacity: usize, // Points kept before the oldest is overwritten
    #[serde(with = "duration_millis")]
    pub max_age: Duration, // Points older than this are evicted by cleanup
    #[serde(with = "duration_millis")]
    pub cleanup_interval: Duration, // Cadence of the age-based cleanup
}

/// Per-series history retained by the aggregator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub max_points_per_series: usize, // Oldest points are overwritten past this
}

/// Alert history retained by the alerter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub max_alerts: usize, // Oldest alerts are overwritten past this
}

/// Completed benchmark history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    pub max_completed: usize, // Completed benchmarks retained
}

/// Overhead circuit breaker tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Relative overhead above which the breaker trips (0.02 = 2%)
    pub overhead_threshold: f64,
    /// Cadence of the overhead check while active
    #[serde(with = "duration_millis")]
    pub check_interval: Duration,
    /// Samples older than this are pruned from the window
    #[serde(with = "duration_millis")]
    pub sampling_window: Duration,
    /// Cadence of the recovery check while tripped
    #[serde(with = "duration_millis")]
    pub recovery_interval: Duration,
    #[serde(with = "duration_millis")]
    pub calibration_interval: Duration, // Delay between reference workload runs
    pub calibration_samples: usize, // Runs that complete calibration
    /// Calibration gives up after this long
    #[serde(with = "duration_millis")]
    pub calibration_timeout: Duration,
    /// Fewer samples than this at timeout disables the breaker for good
    pub min_calibration_samples: usize,
}

/// Startup phase profiling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupConfig {
    pub max_phase_depth: usize, // Open phases allowed at once
    pub track_sub_phases: bool, // Link nested phases to their parent
    pub targets: StartupTargets, // Budgets the profile is judged against
}

/// Startup budgets in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupTargets {
    pub total_startup_time: f64, // Whole startup
    pub framework_init: f64,     // `framework_init` phase
    pub initial_render: f64,     // `initial_render` phase
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store: StoreConfig::default(),
            aggregator: AggregatorConfig::default(),
            alerts: AlertConfig::default(),
            benchmarks: BenchmarkConfig::default(),
            breaker: BreakerConfig::default(),
            startup: StartupConfig::default(),
            critical_metrics: BTreeSet::new(),
            deferred_processing: false,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            max_age: Duration::from_secs(5 * 60),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self { max_points_per_series: 1000 }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self { max_alerts: 1000 }
    }
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self { max_completed: 1000 }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            overhead_threshold: 0.02,
            check_interval: Duration::from_millis(5000),
            sampling_window: Duration::from_millis(60_000),
            recovery_interval: Duration::from_millis(30_000),
            calibration_interval: Duration::from_millis(100),
            calibration_samples: 10,
            calibration_timeout: Duration::from_millis(2000),
            min_calibration_samples: 3,
        }
    }
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self { max_phase_depth: 10, track_sub_phases: true, targets: StartupTargets::default() }
    }
}

impl Default for StartupTargets {
    fn default() -> Self {
        Self { total_startup_time: 100.0, framework_init: 50.0, initial_render: 30.0 }
    }
}

impl BreakerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> TelemetryResult<()> {
        if !self.overhead_threshold.is_finite() || self.overhead_threshold <= 0.0 {
            return Err(TelemetryError::invalid_config(
                "breaker.overhead_threshold",
                format!("must be a positive number, got {}", self.overhead_threshold),
            ));
        }
        for (field, value) in [
            ("breaker.check_interval", self.check_interval),
            ("breaker.sampling_window", self.sampling_window),
            ("breaker.recovery_interval", self.recovery_interval),
            ("breaker.calibration_interval", self.calibration_interval),
            ("breaker.calibration_timeout", self.calibration_timeout),
        ] {
            if value.is_zero() {
                return Err(TelemetryError::invalid_config(field, "must be greater than 0"));
            }
        }
        if self.calibration_samples == 0 {
            return Err(TelemetryError::invalid_config(
                "breaker.calibration_samples",
                "must be greater than 0",
            ));
        }
        if self.min_calibration_samples > self.calibration_samples {
            return Err(TelemetryError::invalid_config(
                "breaker.min_calibration_samples",
                "cannot exceed calibration_samples",
            ));
        }
        Ok(())
    }
}

impl StartupConfig {
    /// Validate the configuration
    pub fn validate(&self) -> TelemetryResult<()> {
        if self.max_phase_depth == 0 {
            return Err(TelemetryError::invalid_config(
                "startup.max_phase_depth",
                "must be greater than 0",
            ));
        }
        for (field, value) in [
            ("startup.targets.total_startup_time", self.targets.total_startup_time),
            ("startup.targets.framework_init", self.targets.framework_init),
            ("startup.targets.initial_render", self.targets.initial_render),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(TelemetryError::invalid_config(field, "must be a positive number"));
            }
        }
        Ok(())
    }
}

impl MonitorConfig {
    /// Parse a TOML document and validate it
    pub fn from_toml_str(source: &str) -> TelemetryResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PERFGUARD_*` environment variable overrides
    ///
    /// Recognised variables:
    /// - `PERFGUARD_OVERHEAD_THRESHOLD` (float)
    /// - `PERFGUARD_CHECK_INTERVAL_MS`, `PERFGUARD_SAMPLING_WINDOW_MS` (ms)
    /// - `PERFGUARD_STORE_CAPACITY` (integer)
    /// - `PERFGUARD_ENABLED` (`1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off`)
    ///
    /// # Errors
    /// Returns `InvalidConfig` when a variable is set but cannot be parsed,
    /// or when the resulting configuration fails validation.
    pub fn with_env_overrides(self) -> TelemetryResult<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup (same keys as
    /// [`with_env_overrides`](Self::with_env_overrides))
    pub fn with_overrides_from<F>(mut self, lookup: F) -> TelemetryResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("PERFGUARD_OVERHEAD_THRESHOLD") {
            self.breaker.overhead_threshold = parse_var("PERFGUARD_OVERHEAD_THRESHOLD", &raw)?;
        }
        if let Some(raw) = lookup("PERFGUARD_CHECK_INTERVAL_MS") {
            self.breaker.check_interval =
                Duration::from_millis(parse_var("PERFGUARD_CHECK_INTERVAL_MS", &raw)?);
        }
        if let Some(raw) = lookup("PERFGUARD_SAMPLING_WINDOW_MS") {
            self.breaker.sampling_window =
                Duration::from_millis(parse_var("PERFGUARD_SAMPLING_WINDOW_MS", &raw)?);
        }
        if let Some(raw) = lookup("PERFGUARD_STORE_CAPACITY") {
            self.store.capacity = parse_var("PERFGUARD_STORE_CAPACITY", &raw)?;
        }
        if let Some(raw) = lookup("PERFGUARD_ENABLED") {
            self.enabled = parse_bool("PERFGUARD_ENABLED", &raw)?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Validate every section
    pub fn validate(&self) -> TelemetryResult<()> {
        for (field, value) in [
            ("store.capacity", self.store.capacity),
            ("aggregator.max_points_per_series", self.aggregator.max_points_per_series),
            ("alerts.max_alerts", self.alerts.max_alerts),
            ("benchmarks.max_completed", self.benchmarks.max_completed),
        ] {
            if value == 0 {
                return Err(TelemetryError::invalid_config(field, "must be greater than 0"));
            }
        }
        if self.store.cleanup_interval.is_zero() {
            return Err(TelemetryError::invalid_config(
                "store.cleanup_interval",
                "must be greater than 0",
            ));
        }
        self.breaker.validate()?;
        self.startup.validate()
    }

    /// Whether `name` bypasses deferred processing
    pub fn is_critical(&self, name: &str) -> bool {
        self.critical_metrics.contains(name)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> TelemetryResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| TelemetryError::invalid_config(key, format!("cannot parse '{raw}'")))
}

fn parse_bool(key: &str, raw: &str) -> TelemetryResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(TelemetryError::invalid_config(key, format!("cannot parse '{raw}' as a boolean"))),
    }
}
