use crate::error::{Result, StorageError};
use crate::MetricStore;
use chrono::DateTime;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard};
use tallymon_common::query::{truncate_millis, AggregateQuery, Bucket, BucketAccumulator};
use tallymon_common::types::{Sample, SeriesKey};

/// Non-persistent store with the same query semantics as
/// [`SqliteMetricStore`](crate::SqliteMetricStore). Timestamps are compared
/// at millisecond precision, like the SQLite columns.
#[derive(Default)]
pub struct MemoryMetricStore {
    samples: RwLock<Vec<Sample>>,
}

impl MemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Sample>> {
        self.samples
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Copy of everything written so far, in write order.
    pub fn samples(&self) -> Vec<Sample> {
        self.read().clone()
    }
}

impl MetricStore for MemoryMetricStore {
    fn write_sample(&self, sample: &Sample) -> Result<()> {
        self.samples
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(sample.clone());
        Ok(())
    }

    fn query_distinct_series(&self) -> Result<Vec<SeriesKey>> {
        let series: BTreeSet<SeriesKey> = self
            .read()
            .iter()
            .map(|s| SeriesKey {
                resource_id: s.resource_id.clone(),
                metric_key: s.metric_key.clone(),
            })
            .collect();
        Ok(series.into_iter().collect())
    }

    fn query_aggregated(&self, query: &AggregateQuery) -> Result<Vec<Bucket>> {
        let bucket_ms = query.bucket_millis();
        if bucket_ms <= 0 {
            return Err(StorageError::Other(format!(
                "bucket size must be positive, got {bucket_ms}ms"
            )));
        }
        let from_ms = query.from.timestamp_millis();
        let to_ms = query.to.timestamp_millis();

        let mut groups: BTreeMap<i64, BucketAccumulator> = BTreeMap::new();
        for sample in self.read().iter() {
            let ts_ms = sample.timestamp.timestamp_millis();
            if ts_ms < from_ms || ts_ms > to_ms {
                continue;
            }
            if !query.resource.matches(&sample.resource_id) || !query.metric.matches(&sample.metric_key) {
                continue;
            }
            groups
                .entry(truncate_millis(ts_ms, bucket_ms))
                .and_modify(|acc| acc.push(sample.value))
                .or_insert_with(|| BucketAccumulator::new(sample.value));
        }

        groups
            .into_iter()
            .map(|(start_ms, acc)| {
                let start = DateTime::from_timestamp_millis(start_ms).ok_or_else(|| {
                    StorageError::Malformed {
                        column: "timestamp",
                        detail: format!("bucket start {start_ms} out of range"),
                    }
                })?;
                Ok(Bucket {
                    start,
                    value: query.aggregator.finish(&acc),
                })
            })
            .collect()
    }
}
