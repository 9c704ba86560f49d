use std::time::Duration;

use serde::Deserialize;

use tracktags_engine::EngineConfig;

/// `[engine]` section.
///
/// # Example
///
/// ```toml
/// [engine]
/// ask_timeout_ms = 1000
/// enable_ticks = true
/// ```
#[derive(Debug, Deserialize)]
pub struct EngineSection {
    /// Deadline of every request/reply between coordinators and units.
    #[serde(default = "default_ask_timeout_ms")]
    pub ask_timeout_ms: u64,
    /// Run the tick loops that drive resets, usage flushes, and cleanup.
    #[serde(default = "default_enable_ticks")]
    pub enable_ticks: bool,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            ask_timeout_ms: default_ask_timeout_ms(),
            enable_ticks: default_enable_ticks(),
        }
    }
}

impl EngineSection {
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            ask_timeout: Duration::from_millis(self.ask_timeout_ms),
            enable_ticks: self.enable_ticks,
        }
    }
}

fn default_ask_timeout_ms() -> u64 {
    1000
}

fn default_enable_ticks() -> bool {
    true
}
