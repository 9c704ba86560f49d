use thiserror::Error;

/// Errors raised while parsing or validating metric and limit definitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("unknown metric operation: {0}")]
    UnknownOperation(String),

    #[error("unknown metric type: {0}")]
    UnknownMetricType(String),

    #[error("unknown tick type: {0}")]
    UnknownTickType(String),

    #[error("unknown limit operator: {0}")]
    UnknownLimitOperator(String),

    #[error("unknown breach action: {0}")]
    UnknownBreachAction(String),

    #[error("invalid limit for metric {metric}: {reason}")]
    InvalidLimit { metric: String, reason: String },

    #[error("invalid metric name: {0}")]
    InvalidMetricName(String),
}
