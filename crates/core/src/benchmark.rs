//! Named, categorised timing spans
//!
//! A benchmark is open from [`BenchmarkTracker::start`] until
//! [`BenchmarkTracker::end`]; open benchmarks live in an id-keyed map and
//! closed ones move to a capped history. Ending an id that is not open is a
//! soft miss.

use std::collections::HashMap;
use std::time::Instant;

use perfguard_common::collections::{RingStore, RingStoreConfig};
use perfguard_common::time::{Clock, SystemClock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::TelemetryResult;
use crate::metrics::Metadata;
use crate::utils::millis;

/// Category used when none is given
pub const DEFAULT_CATEGORY: &str = "general";

/// A named timing span, open until ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Benchmark {
    /// Random UUID returned by `start`
    pub id: String,
    pub name: String,
    /// Grouping key; [`DEFAULT_CATEGORY`] when none was given
    pub category: String,
    /// Epoch milliseconds
    pub start_time: u64,
    /// Epoch milliseconds, set on completion
    pub end_time: Option<u64>,
    /// Elapsed milliseconds, set on completion
    pub duration_ms: Option<f64>,
    /// Caller context passed to `start`
    pub metadata: Option<Metadata>,
}

impl Benchmark {
    /// Metric name a completed benchmark is recorded under
    pub fn metric_name(&self) -> String {
        format!("benchmark.{}.{}", self.category, self.name)
    }
}

struct OpenBenchmark {
    benchmark: Benchmark,
    started: Instant,
}

/// Tracks open and completed benchmarks
pub struct BenchmarkTracker<C: Clock = SystemClock> {
    active: HashMap<String, OpenBenchmark>,
    completed: RingStore<Benchmark, C>,
    clock: C,
}

impl BenchmarkTracker<SystemClock> {
    /// Tracker on the system clock keeping `max_completed` finished benchmarks
    pub fn new(max_completed: usize) -> TelemetryResult<Self> {
        Self::with_clock(max_completed, SystemClock)
    }
}

impl<C: Clock + Clone> BenchmarkTracker<C> {
    /// # Errors
    /// `InvalidCapacity` when `max_completed` is zero.
    pub fn with_clock(max_completed: usize, clock: C) -> TelemetryResult<Self> {
        let completed = RingStore::with_clock(RingStoreConfig::new(max_completed), clock.clone())?;
        Ok(Self { active: HashMap::new(), completed, clock })
    }
}

impl<C: Clock> BenchmarkTracker<C> {
    /// Open a benchmark and return its id
    pub fn start(
        &mut self,
        name: impl Into<String>,
        category: Option<&str>,
        metadata: Option<Metadata>,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let benchmark = Benchmark {
            id: id.clone(),
            name: name.into(),
            category: category.unwrap_or(DEFAULT_CATEGORY).to_string(),
            start_time: self.clock.millis_since_epoch(),
            end_time: None,
            duration_ms: None,
            metadata,
        };
        debug!(
            id = %id,
            name = %benchmark.name,
            category = %benchmark.category,
            "Benchmark started"
        );

        self.active.insert(id.clone(), OpenBenchmark { benchmark, started: self.clock.now() });
        id
    }

    /// Close the benchmark `id`, moving it to the completed history.
    ///
    /// Returns `None` if `id` is not open (never started, or already ended).
    pub fn end(&mut self, id: &str) -> Option<Benchmark> {
        let Some(OpenBenchmark { mut benchmark, started }) = self.active.remove(id) else {
            warn!(id = %id, "Benchmark not found");
            return None;
        };

        let elapsed = self.clock.now().saturating_duration_since(started);
        benchmark.end_time = Some(self.clock.millis_since_epoch());
        benchmark.duration_ms = Some(millis(elapsed));

        self.completed.push(benchmark.clone());
        Some(benchmark)
    }

    /// Run `op` inside a benchmark
    pub fn measure<T>(
        &mut self,
        name: impl Into<String>,
        category: Option<&str>,
        op: impl FnOnce() -> T,
    ) -> (T, Option<Benchmark>) {
        let id = self.start(name, category, None);
        let output = op();
        (output, self.end(&id))
    }

    /// Benchmarks started but not yet ended
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Whether `id` is open
    pub fn is_active(&self, id: &str) -> bool {
        self.active.contains_key(id)
    }

    /// Completed benchmarks, oldest first, optionally for one category
    pub fn completed(&self, category: Option<&str>) -> Vec<Benchmark> {
        self.completed
            .iter()
            .filter(|benchmark| category.map_or(true, |wanted| benchmark.category == wanted))
            .cloned()
            .collect()
    }

    /// Number of benchmarks in the completed history
    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Drop open and completed benchmarks
    pub fn clear(&mut self) {
        self.active.clear();
        self.completed.clear();
    }
}
