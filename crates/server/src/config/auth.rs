use serde::Deserialize;

/// API-key authentication.
///
/// With `enabled = false` every request acts as `dev_business_id`. That is
/// only meant for local development.
#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_dev_business_id")]
    pub dev_business_id: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            dev_business_id: default_dev_business_id(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_dev_business_id() -> String {
    "dev".to_owned()
}
