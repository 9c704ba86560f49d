use serde::Deserialize;

/// Breach webhook delivery.
#[derive(Debug, Deserialize)]
pub struct NotificationsConfig {
    /// Send breach webhooks for limits with `breach_action = "webhook"`.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Per-delivery HTTP timeout.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_timeout() -> u64 {
    10
}
