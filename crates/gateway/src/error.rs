use thiserror::Error;

use tracktags_core::{MetricName, MetricScope, ScopeError};
use tracktags_crypto::CryptoError;
use tracktags_engine::EngineError;
use tracktags_store::StoreError;

/// Errors that can occur while admitting or forwarding a proxied call.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The scope / customer combination could not be resolved.
    #[error(transparent)]
    Scope(#[from] ScopeError),

    /// The proxy request was malformed (bad URL, method, or header).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The metric has no running unit. The gateway never creates one.
    #[error(
        "metric '{metric}' is not provisioned for {scope}; create it with POST /v1/metrics before proxying calls against it"
    )]
    NotProvisioned {
        metric: MetricName,
        scope: MetricScope,
    },

    /// A customer-scoped call named a customer the store does not know.
    #[error("unknown customer: {0}")]
    UnknownCustomer(String),

    /// A bounded status query exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The target (or its authorization file) could not be reached or read.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// The target domain does not list the caller's business.
    #[error("domain '{domain}' has not authorized business '{business_id}'")]
    AuthorizationDenied { domain: String, business_id: String },

    /// The target points back at this service.
    #[error("proxy loop detected: {0}")]
    LoopDetected(String),

    /// The inbound call already carries forwarding markers of this service.
    #[error("request was already proxied by TrackTags")]
    DoubleProxyDetected,

    #[error("engine error: {0}")]
    Engine(EngineError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("credential error: {0}")]
    Credential(#[from] CryptoError),

    /// The gateway was misconfigured (e.g. missing required components).
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<EngineError> for GatewayError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Timeout { .. } => Self::Timeout(err.to_string()),
            EngineError::Store(store) => Self::Store(store),
            other => Self::Engine(other),
        }
    }
}

impl GatewayError {
    /// HTTP status the error maps to at the API boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Scope(_)
            | Self::BadRequest(_)
            | Self::LoopDetected(_)
            | Self::DoubleProxyDetected => 400,
            Self::AuthorizationDenied { .. } => 403,
            Self::NotProvisioned { .. } | Self::UnknownCustomer(_) => 404,
            Self::Upstream(_) => 502,
            Self::Timeout(_)
            | Self::Engine(_)
            | Self::Store(_)
            | Self::Credential(_)
            | Self::Configuration(_) => 500,
        }
    }
}
