use crate::config::ServerConfig;
use crate::ingest::Ingestor;
use crate::query::AggregationEngine;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tallymon_common::types::MetricBatch;
use tallymon_storage::MetricStore;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MetricStore>,
    pub ingestor: Ingestor,
    pub engine: AggregationEngine,
    pub start_time: DateTime<Utc>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wires the ingest and query paths around one store. `alerts` is the
    /// sending half of the evaluator queue.
    pub fn new(
        store: Arc<dyn MetricStore>,
        alerts: mpsc::Sender<MetricBatch>,
        config: ServerConfig,
    ) -> Self {
        Self {
            ingestor: Ingestor::new(store.clone(), alerts),
            engine: AggregationEngine::new(store.clone()),
            store,
            start_time: Utc::now(),
            config: Arc::new(config),
        }
    }
}
