use std::time::Duration;

use thiserror::Error;

use tracktags_core::CoreError;
use tracktags_store::StoreError;

/// Errors from engine coordination and unit messaging.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A bounded request/reply exceeded its deadline. The target may still
    /// process the request.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The target unit terminated before replying.
    #[error("{0} is not running")]
    Stopped(String),

    /// A unit, tenant, or store row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The metric or limit definition was rejected before any unit was built.
    #[error("invalid definition: {0}")]
    Invalid(#[from] CoreError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl EngineError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// A breach notification could not be delivered.
#[derive(Debug, Error)]
#[error("breach notification failed: {0}")]
pub struct NotifyError(pub String);
