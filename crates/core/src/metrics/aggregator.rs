//! Per-metric time series with running aggregations
//!
//! ## Design
//! - **One [`RingStore`] per metric name**, so a noisy metric can only evict
//!   its own history.
//! - **Aggregations recomputed on every record** from the retained points.
//!   Once the ring starts overwriting, min/max/percentiles must forget the
//!   evicted values, which an incremental fold cannot do.
//! - **Nearest-rank percentiles**: sort ascending, take
//!   `ceil(n * p / 100) - 1`, clamp to `[0, n - 1]`. No interpolation.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};

use perfguard_common::collections::{RingStore, RingStoreConfig};
use perfguard_common::error::CommonError;
use perfguard_common::time::{Clock, SystemClock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::point::{Metadata, MetricPoint, Tags};
use crate::error::TelemetryResult;

/// Summary statistics over a set of points
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Aggregations {
    pub count: usize,
    pub sum: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64, // Nearest-rank, like p95 and p99
    pub p95: f64,
    pub p99: f64,
    /// Value of the most recent point
    pub latest: f64,
}

impl Aggregations {
    /// Aggregate `points` (chronological order). Empty input yields all zeros.
    pub fn from_points(points: &[MetricPoint]) -> Self {
        let Some(last) = points.last() else {
            return Self::default();
        };

        let mut sorted: Vec<f64> = points.iter().map(|point| point.value).collect();
        sorted.sort_unstable_by(f64::total_cmp);

        let count = sorted.len();
        let sum: f64 = sorted.iter().sum();

        Self {
            count,
            sum,
            avg: sum / count as f64,
            min: sorted[0],
            max: sorted[count - 1],
            p50: nearest_rank_percentile(&sorted, 50.0).unwrap_or_default(),
            p95: nearest_rank_percentile(&sorted, 95.0).unwrap_or_default(),
            p99: nearest_rank_percentile(&sorted, 99.0).unwrap_or_default(),
            latest: last.value,
        }
    }
}

/// Nearest-rank percentile of an ascending slice
///
/// `index = ceil(n * p / 100) - 1`, clamped to `[0, n - 1]`. For five
/// values, p95 resolves to index `ceil(4.75) - 1 = 4`, the maximum.
///
/// Returns `None` for an empty slice.
pub fn nearest_rank_percentile(sorted: &[f64], percentile: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (sorted.len() as f64 * percentile / 100.0).ceil() as i64 - 1;
    let index = rank.clamp(0, sorted.len() as i64 - 1) as usize;
    Some(sorted[index])
}

/// A named series as returned by queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    /// Metric name
    pub name: String,
    /// Retained points, oldest first
    pub points: Vec<MetricPoint>,
    /// Computed over `points`
    pub aggregations: Aggregations,
    /// Tags shared (same key and value) by every retained point
    pub tags: Tags,
}

/// Inclusive range of epoch-millisecond timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: u64, // Inclusive
    pub end: u64,   // Inclusive
}

impl TimeRange {
    /// Range covering `start..=end`
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Whether `timestamp` falls inside the range, ends included
    pub fn contains(&self, timestamp: u64) -> bool {
        (self.start..=self.end).contains(&timestamp)
    }
}

/// Filter for [`TimeSeriesAggregator::query`]
///
/// - `name`: substring match against the series name
/// - `tags`: the series tag set must contain every entry
/// - `time_range`: filters individual points; series left empty are dropped
/// - `limit`: keep only the most recent N points per series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricQuery {
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Tags,
    pub time_range: Option<TimeRange>,
    pub limit: Option<usize>,
}

impl MetricQuery {
    /// Query matching every series
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep series whose name contains `name`
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Require the series tag `key` to equal `value`; repeatable
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Keep only points timestamped inside `range`
    pub fn time_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    /// Keep at most the `limit` most recent points per series
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches_name(&self, name: &str) -> bool {
        self.name.as_deref().map_or(true, |filter| name.contains(filter))
    }
}

struct SeriesState<C: Clock> {
    points: RingStore<MetricPoint, C>,
    aggregations: Aggregations,
    tags: Tags,
}

impl<C: Clock> SeriesState<C> {
    fn refresh(&mut self) {
        let points = self.points.to_vec();
        self.aggregations = Aggregations::from_points(&points);
        self.tags = common_tags(&points);
    }

    fn snapshot(&self, name: &str) -> MetricSeries {
        MetricSeries {
            name: name.to_string(),
            points: self.points.to_vec(),
            aggregations: self.aggregations,
            tags: self.tags.clone(),
        }
    }
}

/// Groups points by metric name and keeps their aggregations current
pub struct TimeSeriesAggregator<C: Clock + Clone = SystemClock> {
    series: HashMap<String, SeriesState<C>>,
    max_points_per_series: usize,
    clock: C,
}

impl TimeSeriesAggregator<SystemClock> {
    /// Aggregator on the system clock
    pub fn new(max_points_per_series: usize) -> TelemetryResult<Self> {
        Self::with_clock(max_points_per_series, SystemClock)
    }
}

impl<C: Clock + Clone> TimeSeriesAggregator<C> {
    /// # Errors
    /// `InvalidCapacity` when `max_points_per_series` is zero.
    pub fn with_clock(max_points_per_series: usize, clock: C) -> TelemetryResult<Self> {
        if max_points_per_series == 0 {
            return Err(CommonError::invalid_capacity(0, "metric series").into());
        }
        Ok(Self { series: HashMap::new(), max_points_per_series, clock })
    }

    /// Append `point` to its series and recompute that series' aggregations
    pub fn record(&mut self, point: MetricPoint) -> TelemetryResult<()> {
        let state = match self.series.entry(point.name.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                debug!(metric = %entry.key(), "New metric series");
                let config = RingStoreConfig::new(self.max_points_per_series);
                entry.insert(SeriesState {
                    points: RingStore::with_clock(config, self.clock.clone())?,
                    aggregations: Aggregations::default(),
                    tags: Tags::new(),
                })
            }
        };

        state.points.push(point);
        state.refresh();
        Ok(())
    }

    /// Snapshot of one series with its cached aggregations
    pub fn series(&self, name: &str) -> Option<MetricSeries> {
        self.series.get(name).map(|state| state.snapshot(name))
    }

    /// Series matching `query`, ordered by name.
    ///
    /// Aggregations are recomputed over the points that survive the filter,
    /// so they always describe exactly the returned `points`.
    pub fn query(&self, query: &MetricQuery) -> Vec<MetricSeries> {
        let mut names: Vec<&String> =
            self.series.keys().filter(|name| query.matches_name(name)).collect();
        names.sort();

        let mut results = Vec::new();
        for name in names {
            let state = &self.series[name];
            if !is_superset(&state.tags, &query.tags) {
                continue;
            }

            let mut points: Vec<MetricPoint> = state
                .points
                .iter()
                .filter(|point| {
                    query.time_range.map_or(true, |range| range.contains(point.timestamp))
                })
                .cloned()
                .collect();
            if let Some(limit) = query.limit {
                let excess = points.len().saturating_sub(limit);
                points.drain(..excess);
            }
            if points.is_empty() {
                continue;
            }

            results.push(MetricSeries {
                name: name.clone(),
                aggregations: Aggregations::from_points(&points),
                tags: state.tags.clone(),
                points,
            });
        }
        results
    }

    /// Names of every series, sorted
    pub fn series_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.series.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of distinct metric names seen
    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    /// Points retained across all series
    pub fn total_points(&self) -> usize {
        self.series.values().map(|state| state.points.len()).sum()
    }

    /// Per-series capacity
    pub fn max_points_per_series(&self) -> usize {
        self.max_points_per_series
    }

    /// Drop every series
    pub fn clear(&mut self) {
        self.series.clear();
    }
}

/// Bucket `points` into `interval_ms` windows, averaging each bucket.
///
/// Each output point is stamped with its bucket start
/// (`floor(timestamp / interval) * interval`), takes the name and tags of
/// the bucket's first point, and carries `{"aggregated": true, "count": n}`
/// as metadata. Buckets are returned oldest first.
///
/// An `interval_ms` of zero has no buckets and yields an empty result.
pub fn aggregate_by_time(points: &[MetricPoint], interval_ms: u64) -> Vec<MetricPoint> {
    if points.is_empty() {
        return Vec::new();
    }
    if interval_ms == 0 {
        warn!(points = points.len(), "aggregate_by_time called with a zero interval");
        return Vec::new();
    }

    let mut buckets: BTreeMap<u64, Vec<&MetricPoint>> = BTreeMap::new();
    for point in points {
        let bucket = point.timestamp / interval_ms * interval_ms;
        buckets.entry(bucket).or_default().push(point);
    }

    buckets
        .into_iter()
        .filter_map(|(bucket, members)| {
            let first = members.first()?;
            let count = members.len();
            let mean = members.iter().map(|point| point.value).sum::<f64>() / count as f64;

            let mut metadata = Metadata::new();
            metadata.insert("aggregated".to_string(), serde_json::Value::Bool(true));
            metadata.insert("count".to_string(), serde_json::Value::from(count));

            Some(MetricPoint {
                name: first.name.clone(),
                value: mean,
                timestamp: bucket,
                tags: first.tags.clone(),
                metadata,
            })
        })
        .collect()
}

fn common_tags(points: &[MetricPoint]) -> Tags {
    let Some((first, rest)) = points.split_first() else {
        return Tags::new();
    };
    let mut shared = first.tags.clone();
    for point in rest {
        shared.retain(|key, value| point.tags.get(key) == Some(value));
    }
    shared
}

fn is_superset(tags: &Tags, required: &Tags) -> bool {
    required.iter().all(|(key, value)| tags.get(key) == Some(value))
}
