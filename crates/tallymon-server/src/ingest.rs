use crate::error::IngestError;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tallymon_common::types::MetricBatch;
use tallymon_storage::{MetricStore, StorageError};
use tokio::sync::mpsc;
use utoipa::ToSchema;

/// Outcome of a successful ingestion call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct IngestReport {
    /// Number of samples written to the store.
    pub writes: usize,
    /// Whether the batch was handed to the alert evaluator.
    pub evaluated: bool,
}

/// Validates incoming batches and fans them out to the alert evaluator and
/// the store.
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn MetricStore>,
    alerts: mpsc::Sender<MetricBatch>,
}

impl Ingestor {
    pub fn new(store: Arc<dyn MetricStore>, alerts: mpsc::Sender<MetricBatch>) -> Self {
        Self { store, alerts }
    }

    /// Spare slots in the evaluator queue.
    pub fn alert_queue_capacity(&self) -> usize {
        self.alerts.capacity()
    }

    /// Ingests one batch.
    ///
    /// The batch is enqueued for alert evaluation once, waiting for room if
    /// the queue is full, and then every metric is written in key order.
    /// The first failed write ends the call; earlier writes stay stored.
    pub async fn ingest(
        &self,
        resource_id: &str,
        timestamp: &str,
        metrics: BTreeMap<String, f64>,
    ) -> Result<IngestReport, IngestError> {
        if resource_id.is_empty() {
            return Err(IngestError::Validation("resource_id is empty".into()));
        }
        let timestamp = parse_timestamp(timestamp)?;
        for (key, value) in &metrics {
            if key.is_empty() {
                return Err(IngestError::Validation("metric key is empty".into()));
            }
            if !value.is_finite() {
                return Err(IngestError::Validation(format!(
                    "metric {key} has non-finite value"
                )));
            }
        }

        if metrics.is_empty() {
            return Ok(IngestReport {
                writes: 0,
                evaluated: false,
            });
        }

        let batch = MetricBatch {
            resource_id: resource_id.to_string(),
            timestamp,
            metrics,
        };

        let evaluated = match self.alerts.send(batch.clone()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::error!(
                    resource_id = %batch.resource_id,
                    "Alert evaluator queue is closed, batch not evaluated"
                );
                false
            }
        };

        let store = self.store.clone();
        let writes = tokio::task::spawn_blocking(move || {
            let mut writes = 0;
            for sample in batch.samples() {
                if let Err(source) = store.write_sample(&sample) {
                    return Err(IngestError::Storage {
                        metric_key: sample.metric_key,
                        source,
                    });
                }
                writes += 1;
            }
            Ok(writes)
        })
        .await
        .map_err(|e| IngestError::Storage {
            metric_key: String::new(),
            source: StorageError::Other(format!("write task failed: {e}")),
        })??;

        Ok(IngestReport { writes, evaluated })
    }
}

/// Accepts RFC 3339 (`2024-05-01T12:00:00Z`, `...+02:00`) or a naive
/// `YYYY-MM-DDTHH:MM:SS[.fff]`, which is read as UTC.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, IngestError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| IngestError::Validation(format!("unparseable timestamp '{s}'")))
}
