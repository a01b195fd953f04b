//! Metric points and time-series aggregation

pub mod aggregator;
pub mod point;

pub use aggregator::{
    aggregate_by_time, nearest_rank_percentile, Aggregations, MetricQuery, MetricSeries,
    TimeRange, TimeSeriesAggregator,
};
pub use point::{Metadata, MetricPoint, Tags};
