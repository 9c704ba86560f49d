use serde::Deserialize;

/// `[gateway]` section: forwarding and cache settings of `POST /proxy`.
#[derive(Debug, Deserialize)]
pub struct GatewaySection {
    /// Timeout of the forwarded third-party call.
    #[serde(default = "default_forward_timeout")]
    pub forward_timeout_seconds: u64,
    /// How long a domain's `/.tracktags.json` decision is cached.
    #[serde(default = "default_domain_cache_ttl")]
    pub domain_cache_ttl_seconds: u64,
    /// How long decrypted webhook secrets are cached.
    #[serde(default = "default_secret_cache_ttl")]
    pub secret_cache_ttl_seconds: u64,
    /// Maximum entries per cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
    /// Scheme used to fetch authorization files. Only tests use `http`.
    #[serde(default = "default_authorization_file_scheme")]
    pub authorization_file_scheme: String,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            forward_timeout_seconds: default_forward_timeout(),
            domain_cache_ttl_seconds: default_domain_cache_ttl(),
            secret_cache_ttl_seconds: default_secret_cache_ttl(),
            cache_capacity: default_cache_capacity(),
            authorization_file_scheme: default_authorization_file_scheme(),
        }
    }
}

fn default_forward_timeout() -> u64 {
    30
}

fn default_domain_cache_ttl() -> u64 {
    3600
}

fn default_secret_cache_ttl() -> u64 {
    300
}

fn default_cache_capacity() -> u64 {
    10_000
}

fn default_authorization_file_scheme() -> String {
    "https".to_owned()
}
