use serde::Deserialize;
use tracktags_store_memory::DEFAULT_SNAPSHOT_CAPACITY;

/// Plan store backend configuration.
///
/// # Example
///
/// ```toml
/// [store]
/// backend = "memory"
/// seed_path = "seed.toml"
/// max_usage_snapshots = 50000
/// ```
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    /// Backend name. Only `"memory"` is built in.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// TOML or JSON seed loaded into the memory store at startup.
    #[serde(default)]
    pub seed_path: Option<String>,
    /// Usage snapshots the memory store retains before dropping the oldest.
    #[serde(default = "default_max_usage_snapshots")]
    pub max_usage_snapshots: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            seed_path: None,
            max_usage_snapshots: default_max_usage_snapshots(),
        }
    }
}

fn default_backend() -> String {
    "memory".to_owned()
}

fn default_max_usage_snapshots() -> usize {
    DEFAULT_SNAPSHOT_CAPACITY
}
