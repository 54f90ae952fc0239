/// Errors raised while evaluating a batch or building rules.
///
/// # Examples
///
/// ```rust
/// use tallymon_alert::error::AlertError;
///
/// let err = AlertError::MalformedBatch("resource_id is empty".to_string());
/// assert!(err.to_string().contains("resource_id"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    /// The batch cannot be evaluated; it is skipped as a whole.
    #[error("Alert: malformed batch: {0}")]
    MalformedBatch(String),

    /// A rule definition is invalid (unknown operator, empty metric, ...).
    #[error("Alert: invalid rule '{id}': {reason}")]
    InvalidRule { id: String, reason: String },
}

/// Convenience `Result` alias for alerting operations.
pub type Result<T> = std::result::Result<T, AlertError>;
