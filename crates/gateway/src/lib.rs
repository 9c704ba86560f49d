pub mod builder;
pub mod cache;
pub mod domain;
pub mod error;
pub mod forward;
pub mod gateway;
pub mod identity;
pub mod metrics;
pub mod notify;
pub mod secrets;

pub use builder::GatewayBuilder;
pub use cache::TtlCache;
pub use domain::{AuthorizationFile, DomainAuthorizer};
pub use error::GatewayError;
pub use forward::{ForwardConfig, ForwardedResponse, Forwarder};
pub use gateway::{AdmissionGateway, BreachReport, ProxyOutcome, ProxyRequest};
pub use identity::CallerIdentity;
pub use metrics::{GatewayMetrics, GatewayMetricsSnapshot};
pub use notify::WebhookNotifier;
pub use secrets::{WebhookSecretCache, WebhookSecrets};
