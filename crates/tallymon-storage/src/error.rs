/// Errors raised by a [`MetricStore`](crate::MetricStore) implementation.
///
/// Every variant means "the store could not answer"; an empty result is
/// never reported as an error.
///
/// # Examples
///
/// ```rust
/// use tallymon_storage::error::StorageError;
///
/// let err = StorageError::PartitionMissing("2024-01-01".to_string());
/// assert!(err.to_string().contains("2024-01-01"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// An underlying SQLite error.
    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Filesystem failure while creating or scanning partition files.
    #[error("Storage: I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A partition key was used before it was opened.
    #[error("Storage: partition {0} not found")]
    PartitionMissing(String),

    /// A stored value could not be turned back into a domain value.
    #[error("Storage: malformed data in column '{column}': {detail}")]
    Malformed { column: &'static str, detail: String },

    /// Generic storage error for cases not covered by other variants.
    #[error("Storage: {0}")]
    Other(String),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
