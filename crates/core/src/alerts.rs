//! Threshold alerting
//!
//! Each metric name maps to at most one [`Threshold`]. Evaluation is
//! direction-aware and yields at most one [`Alert`] per checked point; the
//! critical level wins when both levels are crossed. Alerts are kept in a
//! capped history, oldest dropped first.

use std::collections::HashMap;
use std::fmt;

use perfguard_common::collections::{RingStore, RingStoreConfig};
use perfguard_common::time::{Clock, SystemClock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{TelemetryError, TelemetryResult};
use crate::metrics::MetricPoint;

/// Which side of the threshold is bad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdDirection {
    /// Larger values are worse (latency, memory)
    #[default]
    Above,
    /// Smaller values are worse (frame rate, hit ratio)
    Below,
}

/// Warning and critical limits for one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    /// Metric name the limits apply to, matched exactly
    pub metric: String,
    /// Limit for a `Warning` alert
    pub warning_value: f64,
    /// Limit for a `Critical` alert; takes precedence over `warning_value`
    pub critical_value: f64,
    #[serde(default)]
    pub direction: ThresholdDirection,
}

impl Threshold {
    /// Alert when the value rises to `warning` / `critical`
    pub fn above(metric: impl Into<String>, warning: f64, critical: f64) -> Self {
        Self {
            metric: metric.into(),
            warning_value: warning,
            critical_value: critical,
            direction: ThresholdDirection::Above,
        }
    }

    /// Alert when the value falls to `warning` / `critical`
    pub fn below(metric: impl Into<String>, warning: f64, critical: f64) -> Self {
        Self {
            metric: metric.into(),
            warning_value: warning,
            critical_value: critical,
            direction: ThresholdDirection::Below,
        }
    }

    /// Check the ordering invariant: for `Above`, critical >= warning; for
    /// `Below`, critical <= warning. Both values must be finite.
    pub fn validate(&self) -> TelemetryResult<()> {
        if self.metric.is_empty() {
            return Err(TelemetryError::invalid_threshold("", "metric name is empty"));
        }
        if !self.warning_value.is_finite() || !self.critical_value.is_finite() {
            return Err(TelemetryError::invalid_threshold(
                &self.metric,
                "threshold values must be finite",
            ));
        }
        let ordered = match self.direction {
            ThresholdDirection::Above => self.critical_value >= self.warning_value,
            ThresholdDirection::Below => self.critical_value <= self.warning_value,
        };
        if !ordered {
            return Err(TelemetryError::invalid_threshold(
                &self.metric,
                format!(
                    "critical value {} is on the wrong side of warning value {} for direction {:?}",
                    self.critical_value, self.warning_value, self.direction
                ),
            ));
        }
        Ok(())
    }

    fn level_for(&self, value: f64) -> Option<AlertLevel> {
        let crossed = |limit: f64| match self.direction {
            ThresholdDirection::Above => value >= limit,
            ThresholdDirection::Below => value <= limit,
        };
        if crossed(self.critical_value) {
            Some(AlertLevel::Critical)
        } else if crossed(self.warning_value) {
            Some(AlertLevel::Warning)
        } else {
            None
        }
    }
}

/// Severity of an [`Alert`]
///
/// Ordered, so `Critical > Warning`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warning,
    Critical,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A threshold violation. Produced once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Random UUID identifying this alert
    pub id: String,
    /// Epoch milliseconds when the alert was raised
    pub timestamp: u64,
    /// Metric that crossed the threshold
    pub metric: String,
    /// Offending value
    pub value: f64,
    /// Threshold as it was configured when the alert fired
    pub threshold: Threshold,
    /// Most severe level the value reached
    pub level: AlertLevel,
    /// Human-readable summary, e.g. `render.time exceeded warning threshold: 60 vs 50`
    pub message: String,
}

/// Evaluates points against per-metric thresholds
pub struct ThresholdAlerter<C: Clock = SystemClock> {
    thresholds: HashMap<String, Threshold>,
    alerts: RingStore<Alert, C>,
    clock: C,
}

impl ThresholdAlerter<SystemClock> {
    /// Alerter on the system clock keeping at most `max_alerts` alerts
    pub fn new(max_alerts: usize) -> TelemetryResult<Self> {
        Self::with_clock(max_alerts, SystemClock)
    }
}

impl<C: Clock + Clone> ThresholdAlerter<C> {
    /// # Errors
    /// `InvalidCapacity` when `max_alerts` is zero.
    pub fn with_clock(max_alerts: usize, clock: C) -> TelemetryResult<Self> {
        let alerts = RingStore::with_clock(RingStoreConfig::new(max_alerts), clock.clone())?;
        Ok(Self { thresholds: HashMap::new(), alerts, clock })
    }
}

impl<C: Clock> ThresholdAlerter<C> {
    /// Register `threshold`, replacing any existing one for the same metric
    pub fn add_threshold(&mut self, threshold: Threshold) -> TelemetryResult<()> {
        threshold.validate()?;
        debug!(
            metric = %threshold.metric,
            warning = threshold.warning_value,
            critical = threshold.critical_value,
            "Threshold registered"
        );
        self.thresholds.insert(threshold.metric.clone(), threshold);
        Ok(())
    }

    /// Returns `true` if a threshold was removed
    pub fn remove_threshold(&mut self, metric: &str) -> bool {
        self.thresholds.remove(metric).is_some()
    }

    /// Threshold registered for `metric`, if any
    pub fn threshold(&self, metric: &str) -> Option<&Threshold> {
        self.thresholds.get(metric)
    }

    /// Registered thresholds, ordered by metric name
    pub fn thresholds(&self) -> Vec<Threshold> {
        let mut all: Vec<Threshold> = self.thresholds.values().cloned().collect();
        all.sort_by(|a, b| a.metric.cmp(&b.metric));
        all
    }

    /// Evaluate `point`; a violation is stored in the history and returned
    pub fn check_metric(&mut self, point: &MetricPoint) -> Option<Alert> {
        let threshold = self.thresholds.get(&point.name)?;
        let level = threshold.level_for(point.value)?;

        let limit = match level {
            AlertLevel::Warning => threshold.warning_value,
            AlertLevel::Critical => threshold.critical_value,
        };
        let relation = match threshold.direction {
            ThresholdDirection::Above => "exceeded",
            ThresholdDirection::Below => "fell below",
        };

        let alert = Alert {
            id: Uuid::new_v4().to_string(),
            timestamp: self.clock.millis_since_epoch(),
            metric: point.name.clone(),
            value: point.value,
            threshold: threshold.clone(),
            level,
            message: format!(
                "{} {relation} {level} threshold: {} vs {limit}",
                point.name, point.value
            ),
        };

        warn!(metric = %alert.metric, value = alert.value, level = %level, "Threshold alert");
        self.alerts.push(alert.clone());
        Some(alert)
    }

    /// Alert history, oldest first, optionally filtered by level
    pub fn alerts(&self, level: Option<AlertLevel>) -> Vec<Alert> {
        self.alerts
            .iter()
            .filter(|alert| level.map_or(true, |wanted| alert.level == wanted))
            .cloned()
            .collect()
    }

    /// Number of alerts in the history
    pub fn alert_count(&self) -> usize {
        self.alerts.len()
    }

    /// Drop the alert history, keeping thresholds
    pub fn clear_alerts(&mut self) {
        self.alerts.clear();
    }

    /// Drop every threshold and alert
    pub fn clear(&mut self) {
        self.thresholds.clear();
        self.alerts.clear();
    }
}
