use std::time::Duration;
use tallymon_storage::StorageError;

/// Why an ingestion call failed.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Rejected before anything was written or enqueued.
    #[error("invalid batch: {0}")]
    Validation(String),

    /// A sample write failed. Samples of the same batch written before the
    /// failure stay stored.
    #[error("failed to store {metric_key}: {source}")]
    Storage {
        metric_key: String,
        #[source]
        source: StorageError,
    },
}

/// Why an aggregate query failed. An empty result is not an error.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid query: {0}")]
    Invalid(String),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("query exceeded {}ms", .0.as_millis())]
    Timeout(Duration),
}
