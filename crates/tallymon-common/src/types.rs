use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single stored measurement. Several samples may share the same
/// `(resource_id, metric_key, timestamp)`; all of them are kept and counted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub resource_id: String,
    pub metric_key: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// The metrics one resource reported for one instant, as submitted in a
/// single ingestion call.
///
/// Metrics are kept in a `BTreeMap` so writes and alert evaluation walk the
/// keys in a stable order.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
/// use chrono::Utc;
/// use tallymon_common::types::MetricBatch;
///
/// let mut metrics = BTreeMap::new();
/// metrics.insert("mem.used".to_string(), 512.0);
/// metrics.insert("cpu.user".to_string(), 20.0);
/// let batch = MetricBatch { resource_id: "host1".into(), timestamp: Utc::now(), metrics };
///
/// let keys: Vec<_> = batch.samples().map(|s| s.metric_key).collect();
/// assert_eq!(keys, vec!["cpu.user", "mem.used"]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricBatch {
    pub resource_id: String,
    pub timestamp: DateTime<Utc>,
    pub metrics: BTreeMap<String, f64>,
}

impl MetricBatch {
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Expands the batch into one [`Sample`] per metric key.
    pub fn samples(&self) -> impl Iterator<Item = Sample> + '_ {
        self.metrics.iter().map(move |(key, value)| Sample {
            resource_id: self.resource_id.clone(),
            metric_key: key.clone(),
            timestamp: self.timestamp,
            value: *value,
        })
    }
}

/// A distinct `(resource_id, metric_key)` pair known to the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub resource_id: String,
    pub metric_key: String,
}

/// Raised when a sample satisfies an alert rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Id of the rule that fired.
    pub rule_id: String,
    pub resource_id: String,
    pub metric_key: String,
    pub value: f64,
    pub threshold: f64,
    /// Timestamp of the batch that carried the sample, not the wall clock.
    pub timestamp: DateTime<Utc>,
    pub message: String,
}
