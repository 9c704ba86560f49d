mod auth;
mod engine;
mod gateway;
mod notifications;
mod server;
mod store;
mod telemetry;


pub use auth::*;
pub use engine::*;
pub use gateway::*;
pub use notifications::*;
pub use server::*;
pub use store::*;
pub use telemetry::*;

use std::path::Path;

use serde::Deserialize;

use crate::error::ServerError;

/// Top-level configuration for the TrackTags server, loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct TrackTagsConfig {
    /// HTTP server bind configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Metric engine tuning.
    #[serde(default)]
    pub engine: EngineSection,
    /// Admission gateway caches and forwarding.
    #[serde(default)]
    pub gateway: GatewaySection,
    /// Plan store backend.
    #[serde(default)]
    pub store: StoreConfig,
    /// Breach webhook delivery.
    #[serde(default)]
    pub notifications: NotificationsConfig,
    /// API-key authentication.
    #[serde(default)]
    pub auth: AuthConfig,
    /// OpenTelemetry distributed tracing configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl TrackTagsConfig {
    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        if !path.exists() {
            return Self::from_toml("");
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ServerError> {
        toml::from_str(contents).map_err(|e| ServerError::Config(e.to_string()))
    }
}
