use serde::Deserialize;

/// HTTP server bind configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Host name under which this service is reachable from the outside
    /// (e.g. `api.tracktags.com`, optionally with a port).
    ///
    /// Proxied calls to this host are rejected as loops. When unset the
    /// server runs in development mode: domain authorization fails open.
    #[serde(default)]
    pub public_host: Option<String>,
    /// Path of the proxy endpoint. Targets with this path are loops.
    #[serde(default = "default_proxy_path")]
    pub proxy_path: String,
    /// Graceful shutdown timeout in seconds.
    ///
    /// Maximum time to wait for in-flight usage flushes and breach webhooks
    /// after the listener stops.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_host: None,
            proxy_path: default_proxy_path(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_port() -> u16 {
    8080
}

fn default_proxy_path() -> String {
    "/proxy".to_owned()
}

fn default_shutdown_timeout() -> u64 {
    30
}
