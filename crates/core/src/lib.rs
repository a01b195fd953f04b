//! # perfguard Core
//!
//! Self-limiting in-process performance telemetry.
//!
//! This crate contains:
//! - Metric recording, per-series aggregation and nearest-rank percentiles
//! - Threshold alerting and named benchmarks
//! - The overhead circuit breaker that gates all collection
//! - Startup phase tracking with bottleneck detection and scoring
//! - [`PerformanceMonitor`], the facade a host application talks to
//!
//! ## Architecture Principles
//! - Only depends on `perfguard-common` for storage, time and errors
//! - No I/O: export, persistence and transport are the host's concern
//! - All time flows through a [`Clock`](perfguard_common::time::Clock)
//! - Telemetry never fails the host: misses are `None`/`false`, listener
//!   failures are logged and isolated

pub mod alerts;
pub mod benchmark;
pub mod breaker;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod monitor;
pub mod startup;

mod utils;

// Re-export specific items to avoid ambiguity
pub use alerts::{Alert, AlertLevel, Threshold, ThresholdAlerter, ThresholdDirection};
pub use benchmark::{Benchmark, BenchmarkTracker};
pub use breaker::{BreakerPhase, CircuitBreakerState, OverheadCircuitBreaker};
pub use config::{
    AggregatorConfig, AlertConfig, BenchmarkConfig, BreakerConfig, MonitorConfig, StartupConfig,
    StartupTargets, StoreConfig,
};
pub use error::{TelemetryError, TelemetryResult};
pub use events::{ListenerRegistry, ListenerResult, TelemetryListener};
pub use metrics::{
    aggregate_by_time, Aggregations, Metadata, MetricPoint, MetricQuery, MetricSeries, Tags,
    TimeRange, TimeSeriesAggregator,
};
pub use monitor::{MonitorStats, PerformanceMonitor};
pub use startup::{
    Bottleneck, BottleneckReason, BottleneckSeverity, PhaseOptions, StartupPhase,
    StartupPhaseTracker, StartupProfile, StartupReport,
};
