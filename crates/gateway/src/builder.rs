use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use tracktags_crypto::CredentialCipher;
use tracktags_engine::MetricDirectoryReader;
use tracktags_store::PlanStore;

use crate::domain::DomainAuthorizer;
use crate::error::GatewayError;
use crate::forward::{ForwardConfig, Forwarder};
use crate::gateway::AdmissionGateway;
use crate::metrics::GatewayMetrics;
use crate::secrets::WebhookSecretCache;

/// Fluent builder for an [`AdmissionGateway`].
///
/// A [`MetricDirectoryReader`] and a [`PlanStore`] must be supplied. Without
/// a public host, loop detection only checks the proxy path and domain
/// authorization fails open.
pub struct GatewayBuilder {
    reader: Option<MetricDirectoryReader>,
    store: Option<Arc<dyn PlanStore>>,
    cipher: Option<CredentialCipher>,
    secrets: Option<Arc<WebhookSecretCache>>,
    client: Option<reqwest::Client>,
    public_host: Option<String>,
    proxy_path: String,
    forward_timeout: Duration,
    domain_cache_ttl: Duration,
    secret_cache_ttl: Duration,
    cache_capacity: u64,
    authorization_file_scheme: String,
    metrics: Option<Arc<GatewayMetrics>>,
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self {
            reader: None,
            store: None,
            cipher: None,
            secrets: None,
            client: None,
            public_host: None,
            proxy_path: "/proxy".to_owned(),
            forward_timeout: Duration::from_secs(30),
            domain_cache_ttl: Duration::from_secs(3600),
            secret_cache_ttl: Duration::from_secs(300),
            cache_capacity: 10_000,
            authorization_file_scheme: "https".to_owned(),
            metrics: None,
        }
    }

    #[must_use]
    pub fn directory_reader(mut self, reader: MetricDirectoryReader) -> Self {
        self.reader = Some(reader);
        self
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn PlanStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Cipher for stored webhook secrets. Ignored when
    /// [`webhook_secrets`](Self::webhook_secrets) is set.
    #[must_use]
    pub fn cipher(mut self, cipher: CredentialCipher) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Share an existing secret cache (e.g. with the breach notifier).
    #[must_use]
    pub fn webhook_secrets(mut self, secrets: Arc<WebhookSecretCache>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    #[must_use]
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    #[must_use]
    pub fn public_host(mut self, host: impl Into<String>) -> Self {
        let host = host.into();
        self.public_host = (!host.trim().is_empty()).then_some(host);
        self
    }

    #[must_use]
    pub fn proxy_path(mut self, path: impl Into<String>) -> Self {
        self.proxy_path = path.into();
        self
    }

    #[must_use]
    pub fn forward_timeout(mut self, timeout: Duration) -> Self {
        self.forward_timeout = timeout;
        self
    }

    #[must_use]
    pub fn domain_cache_ttl(mut self, ttl: Duration) -> Self {
        self.domain_cache_ttl = ttl;
        self
    }

    #[must_use]
    pub fn secret_cache_ttl(mut self, ttl: Duration) -> Self {
        self.secret_cache_ttl = ttl;
        self
    }

    #[must_use]
    pub fn cache_capacity(mut self, capacity: u64) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Scheme used to fetch `/.tracktags.json` (`https` outside tests).
    #[must_use]
    pub fn authorization_file_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.authorization_file_scheme = scheme.into();
        self
    }

    #[must_use]
    pub fn metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<AdmissionGateway, GatewayError> {
        let reader = self.reader.ok_or_else(|| {
            GatewayError::Configuration("metric directory reader is required".into())
        })?;
        let store = self
            .store
            .ok_or_else(|| GatewayError::Configuration("plan store is required".into()))?;
        if !self.proxy_path.starts_with('/') {
            return Err(GatewayError::Configuration(format!(
                "proxy_path must start with '/': {}",
                self.proxy_path
            )));
        }
        if !matches!(self.authorization_file_scheme.as_str(), "http" | "https") {
            return Err(GatewayError::Configuration(format!(
                "unsupported authorization file scheme: {}",
                self.authorization_file_scheme
            )));
        }

        let client = match self.client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .timeout(self.forward_timeout)
                .build()
                .map_err(|e| GatewayError::Configuration(format!("http client: {e}")))?,
        };
        let fail_open = self.public_host.is_none();
        if fail_open {
            warn!("no public host configured: domain authorization fails open");
        }

        let secrets = self.secrets.unwrap_or_else(|| {
            Arc::new(WebhookSecretCache::new(
                Arc::clone(&store),
                self.cipher,
                self.cache_capacity,
                self.secret_cache_ttl,
            ))
        });
        let domains = DomainAuthorizer::new(
            client.clone(),
            self.cache_capacity,
            self.domain_cache_ttl,
            self.authorization_file_scheme,
            fail_open,
        );
        let forwarder = Forwarder::new(
            client,
            ForwardConfig {
                public_host: self.public_host,
                proxy_path: self.proxy_path,
                timeout: self.forward_timeout,
            },
        );

        Ok(AdmissionGateway {
            reader,
            store,
            forwarder,
            domains,
            secrets,
            metrics: self.metrics.unwrap_or_default(),
        })
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}
