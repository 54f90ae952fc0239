use crate::error::QueryError;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tallymon_common::query::{AggregateQuery, Aggregator, Bucket, Pattern};
use tallymon_storage::{MetricStore, StorageError};

/// A graph request before it is resolved against the clock.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub resource: String,
    pub metric: String,
    pub aggregator: Aggregator,
    /// Look-back from "now".
    pub window: Duration,
    pub bucket: Duration,
    /// Replace values by the first difference between consecutive buckets.
    pub delta: bool,
}

/// Turns [`QuerySpec`]s into bucketed series read from the store.
#[derive(Clone)]
pub struct AggregationEngine {
    store: Arc<dyn MetricStore>,
}

impl AggregationEngine {
    pub fn new(store: Arc<dyn MetricStore>) -> Self {
        Self { store }
    }

    pub async fn query(&self, spec: &QuerySpec, timeout: Duration) -> Result<Vec<Bucket>, QueryError> {
        self.query_at(spec, Utc::now(), timeout).await
    }

    /// Runs `spec` with `now` as the end of the window.
    ///
    /// If the store does not answer within `timeout` the read is abandoned
    /// and [`QueryError::Timeout`] is returned; no partial buckets are ever
    /// produced.
    pub async fn query_at(
        &self,
        spec: &QuerySpec,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Vec<Bucket>, QueryError> {
        let query = resolve(spec, now)?;

        let store = self.store.clone();
        let read = tokio::task::spawn_blocking(move || store.query_aggregated(&query));

        let buckets = match tokio::time::timeout(timeout, read).await {
            Ok(Ok(result)) => result?,
            Ok(Err(e)) => {
                return Err(QueryError::Storage(StorageError::Other(format!(
                    "query task failed: {e}"
                ))))
            }
            Err(_) => {
                tracing::warn!(
                    resource = %spec.resource,
                    metric = %spec.metric,
                    timeout_ms = timeout.as_millis() as u64,
                    "Aggregate query timed out"
                );
                return Err(QueryError::Timeout(timeout));
            }
        };

        Ok(if spec.delta {
            apply_delta(&buckets)
        } else {
            buckets
        })
    }
}

fn resolve(spec: &QuerySpec, now: DateTime<Utc>) -> Result<AggregateQuery, QueryError> {
    if spec.resource.is_empty() {
        return Err(QueryError::Invalid("resource pattern is empty".into()));
    }
    if spec.metric.is_empty() {
        return Err(QueryError::Invalid("metric pattern is empty".into()));
    }
    if spec.window.is_zero() {
        return Err(QueryError::Invalid("window must be positive".into()));
    }
    if spec.bucket.as_millis() == 0 {
        return Err(QueryError::Invalid(
            "bucket size must be at least 1ms".into(),
        ));
    }
    let window = chrono::Duration::from_std(spec.window)
        .map_err(|_| QueryError::Invalid("window is too large".into()))?;
    let bucket = chrono::Duration::from_std(spec.bucket)
        .map_err(|_| QueryError::Invalid("bucket size is too large".into()))?;
    let from = now
        .checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    Ok(AggregateQuery {
        resource: Pattern::parse(&spec.resource),
        metric: Pattern::parse(&spec.metric),
        aggregator: spec.aggregator,
        from,
        to: now,
        bucket,
    })
}

/// First difference of a bucket series: bucket `i` takes the value
/// `b[i+1] - b[i]` and keeps its own start; the last bucket is dropped.
pub fn apply_delta(buckets: &[Bucket]) -> Vec<Bucket> {
    buckets
        .windows(2)
        .map(|pair| Bucket {
            start: pair[0].start,
            value: pair[1].value - pair[0].value,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tallymon_common::types::{Sample, SeriesKey};
    use tallymon_storage::MemoryMetricStore;

    fn bucket(secs: i64, value: f64) -> Bucket {
        Bucket {
            start: Utc.timestamp_opt(secs, 0).unwrap(),
            value,
        }
    }

    fn spec(aggregator: Aggregator) -> QuerySpec {
        QuerySpec {
            resource: "*".into(),
            metric: "cpu.user".into(),
            aggregator,
            window: Duration::from_secs(3600),
            bucket: Duration::from_secs(60),
            delta: false,
        }
    }

    struct StallingStore;

    impl MetricStore for StallingStore {
        fn write_sample(&self, _sample: &Sample) -> tallymon_storage::error::Result<()> {
            Ok(())
        }

        fn query_distinct_series(&self) -> tallymon_storage::error::Result<Vec<SeriesKey>> {
            Ok(Vec::new())
        }

        fn query_aggregated(
            &self,
            _query: &AggregateQuery,
        ) -> tallymon_storage::error::Result<Vec<Bucket>> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(vec![bucket(0, 1.0)])
        }
    }

    #[test]
    fn delta_of_series() {
        let out = apply_delta(&[bucket(0, 1.0), bucket(60, 4.0), bucket(180, 2.5)]);
        assert_eq!(out, vec![bucket(0, 3.0), bucket(60, -1.5)]);
    }

    #[test]
    fn delta_of_short_series_is_empty() {
        assert!(apply_delta(&[]).is_empty());
        assert!(apply_delta(&[bucket(0, 1.0)]).is_empty());
    }

    #[test]
    fn resolve_rejects_bad_shapes() {
        let now = Utc::now();
        let mut s = spec(Aggregator::Avg);
        s.metric.clear();
        assert!(matches!(resolve(&s, now), Err(QueryError::Invalid(_))));

        let mut s = spec(Aggregator::Avg);
        s.bucket = Duration::ZERO;
        assert!(matches!(resolve(&s, now), Err(QueryError::Invalid(_))));

        let mut s = spec(Aggregator::Avg);
        s.window = Duration::ZERO;
        assert!(matches!(resolve(&s, now), Err(QueryError::Invalid(_))));
    }

    #[test]
    fn resolve_builds_window_ending_now() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let q = resolve(&spec(Aggregator::Max), now).unwrap();
        assert_eq!(q.to, now);
        assert_eq!(q.from, now - chrono::Duration::hours(1));
        assert_eq!(q.bucket_millis(), 60_000);
        assert!(q.resource.is_any());
    }

    #[tokio::test]
    async fn engine_applies_delta_after_bucketing() {
        let store = Arc::new(MemoryMetricStore::new());
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        for (mins_ago, value) in [(3, 10.0), (2, 15.0), (1, 12.0)] {
            store
                .write_sample(&Sample {
                    resource_id: "host1".into(),
                    metric_key: "cpu.user".into(),
                    timestamp: now - chrono::Duration::minutes(mins_ago),
                    value,
                })
                .unwrap();
        }
        let engine = AggregationEngine::new(store);

        let mut s = spec(Aggregator::Avg);
        s.delta = true;
        let out = engine.query_at(&s, now, Duration::from_secs(5)).await.unwrap();
        let values: Vec<f64> = out.iter().map(|b| b.value).collect();
        assert_eq!(values, vec![5.0, -3.0]);
        assert_eq!(out[0].start, now - chrono::Duration::minutes(3));
    }

    #[tokio::test]
    async fn slow_store_times_out_without_results() {
        let engine = AggregationEngine::new(Arc::new(StallingStore));
        let err = engine
            .query(&spec(Aggregator::Avg), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Timeout(_)));
    }
}
