use thiserror::Error;

/// Errors from plan store operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("invalid record: {0}")]
    Invalid(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}
