//! Startup wiring: store, credential cipher, engine, gateway, and
//! authentication assembled into an [`AppState`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use tracktags_crypto::{CredentialCipher, MASTER_KEY_ENV};
use tracktags_engine::{BreachNotifier, Engine, StoreUsageSink};
use tracktags_gateway::{AdmissionGateway, WebhookNotifier, WebhookSecretCache};
use tracktags_store::PlanStore;
use tracktags_store_memory::MemoryPlanStore;

use crate::api::AppState;
use crate::auth::Authenticator;
use crate::config::{StoreConfig, TrackTagsConfig};
use crate::error::ServerError;

/// Create the configured plan store.
pub fn create_store(config: &StoreConfig) -> Result<Arc<dyn PlanStore>, ServerError> {
    if config.backend != "memory" {
        return Err(ServerError::Config(format!(
            "unsupported store backend '{}'",
            config.backend
        )));
    }
    let capacity = config.max_usage_snapshots;
    let store = match &config.seed_path {
        Some(path) => {
            let store = MemoryPlanStore::from_seed_file(Path::new(path))?;
            info!(
                path = %path,
                businesses = store.business_count(),
                customers = store.customer_count(),
                "memory store seeded"
            );
            store.with_snapshot_capacity(capacity)
        }
        None => MemoryPlanStore::new().with_snapshot_capacity(capacity),
    };
    Ok(Arc::new(store))
}

/// The credential cipher keyed by `TRACKTAGS_MASTER_KEY`, if the variable
/// is set. Without it, stored webhook secrets cannot be used.
pub fn master_cipher() -> Result<Option<CredentialCipher>, ServerError> {
    let Ok(raw) = std::env::var(MASTER_KEY_ENV) else {
        return Ok(None);
    };
    CredentialCipher::from_key_text(&raw)
        .map(Some)
        .map_err(|e| ServerError::Config(format!("invalid {MASTER_KEY_ENV}: {e}")))
}

/// Build the engine, the gateway, and the authenticator around `store`.
///
/// `http_client` carries forwarded calls and authorization file fetches.
/// Must be called inside a tokio runtime.
pub fn build_state(
    config: &TrackTagsConfig,
    store: Arc<dyn PlanStore>,
    cipher: Option<CredentialCipher>,
    http_client: reqwest::Client,
) -> Result<AppState, ServerError> {
    if cipher.is_none() {
        warn!("{MASTER_KEY_ENV} not set: stored webhook secrets are unusable");
    }
    let gateway_config = &config.gateway;
    let secrets = Arc::new(WebhookSecretCache::new(
        Arc::clone(&store),
        cipher,
        gateway_config.cache_capacity,
        Duration::from_secs(gateway_config.secret_cache_ttl_seconds),
    ));

    let mut engine = Engine::builder()
        .store(Arc::clone(&store))
        .usage_sink(Arc::new(StoreUsageSink::new(Arc::clone(&store))))
        .config(config.engine.to_engine_config());
    if config.notifications.enabled {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.notifications.timeout_seconds))
            .build()
            .map_err(|e| ServerError::Config(format!("webhook http client: {e}")))?;
        let notifier: Arc<dyn BreachNotifier> =
            Arc::new(WebhookNotifier::new(client, Arc::clone(&secrets)));
        engine = engine.breach_notifier(notifier);
    }
    let engine = engine.build()?;

    let gateway = AdmissionGateway::builder()
        .directory_reader(engine.directory_reader())
        .store(Arc::clone(&store))
        .webhook_secrets(secrets)
        .http_client(http_client)
        .public_host(config.server.public_host.clone().unwrap_or_default())
        .proxy_path(config.server.proxy_path.clone())
        .forward_timeout(Duration::from_secs(gateway_config.forward_timeout_seconds))
        .domain_cache_ttl(Duration::from_secs(gateway_config.domain_cache_ttl_seconds))
        .secret_cache_ttl(Duration::from_secs(gateway_config.secret_cache_ttl_seconds))
        .cache_capacity(gateway_config.cache_capacity)
        .authorization_file_scheme(gateway_config.authorization_file_scheme.clone())
        .build()?;

    let auth = if config.auth.enabled {
        Authenticator::api_keys(Arc::clone(&store))
    } else {
        warn!(
            business_id = %config.auth.dev_business_id,
            "authentication disabled: every request acts as the development business"
        );
        Authenticator::disabled(Arc::clone(&store), config.auth.dev_business_id.as_str())
    };

    Ok(AppState {
        engine,
        gateway: Arc::new(gateway),
        auth: Arc::new(auth),
        proxy_path: config.server.proxy_path.clone(),
    })
}
