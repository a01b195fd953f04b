use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Point tags; ordered so series tag sets compare and print deterministically
pub type Tags = BTreeMap<String, String>;

/// Free-form point metadata
pub type Metadata = HashMap<String, serde_json::Value>;

/// A single recorded measurement
///
/// `timestamp` is wall-clock milliseconds since the UNIX epoch, taken from
/// the recording component's clock at capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Metric name, e.g. `render.time`
    pub name: String,
    pub value: f64,
    /// Epoch milliseconds
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: Tags,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: Metadata,
}

impl MetricPoint {
    /// Point without tags or metadata
    pub fn new(name: impl Into<String>, value: f64, timestamp: u64) -> Self {
        Self { name: name.into(), value, timestamp, tags: Tags::new(), metadata: Metadata::new() }
    }

    /// Replace all tags
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    /// Set one tag, overwriting an existing value for `key`
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Replace the metadata
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_tags() {
        let point = MetricPoint::new("render.time", 12.5, 1_000)
            .with_tag("screen", "home")
            .with_tag("screen", "settings")
            .with_tag("build", "debug");

        assert_eq!(point.tags.len(), 2);
        assert_eq!(point.tags.get("screen").map(String::as_str), Some("settings"));
        assert!(point.metadata.is_empty());
    }

    #[test]
    fn test_serialization_skips_empty_maps() {
        let json = serde_json::to_value(MetricPoint::new("cpu", 1.0, 5)).unwrap();
        assert_eq!(json, serde_json::json!({"name": "cpu", "value": 1.0, "timestamp": 5}));

        let back: MetricPoint = serde_json::from_value(json).unwrap();
        assert!(back.tags.is_empty());
    }
}
