use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tracing::debug;

use tracktags_core::BusinessId;
use tracktags_crypto::CredentialCipher;
use tracktags_store::PlanStore;

use crate::cache::TtlCache;
use crate::error::GatewayError;

const SECRETS_CACHE: &str = "webhook_secrets";

/// A business's decrypted webhook signing secrets.
pub struct WebhookSecrets {
    pub primary: SecretString,
    /// Set while a rotation is in progress.
    pub secondary: Option<SecretString>,
}

impl fmt::Debug for WebhookSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookSecrets")
            .field("primary", &"[redacted]")
            .field("secondary", &self.secondary.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

/// Per-business cache of decrypted webhook secrets.
///
/// Shared by the admission gateway (secret headers on forwarded calls) and
/// the breach webhook notifier (body signing).
pub struct WebhookSecretCache {
    store: Arc<dyn PlanStore>,
    cipher: Option<CredentialCipher>,
    cache: TtlCache<Option<Arc<WebhookSecrets>>>,
    ttl: Duration,
}

impl WebhookSecretCache {
    pub fn new(
        store: Arc<dyn PlanStore>,
        cipher: Option<CredentialCipher>,
        cache_capacity: u64,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            cipher,
            cache: TtlCache::new(cache_capacity, ttl),
            ttl,
        }
    }

    /// Decrypted secrets of `business_id`, or `None` when it has none.
    pub async fn get(
        &self,
        business_id: &BusinessId,
    ) -> Result<Option<Arc<WebhookSecrets>>, GatewayError> {
        self.cache
            .fetch(SECRETS_CACHE, business_id.as_str(), self.ttl, || {
                self.load(business_id)
            })
            .await
            .map_err(unshare)
    }

    /// Drop the cached entry, e.g. after a secret rotation.
    pub async fn invalidate(&self, business_id: &BusinessId) {
        self.cache.invalidate(SECRETS_CACHE, business_id.as_str()).await;
    }

    async fn load(
        &self,
        business_id: &BusinessId,
    ) -> Result<Option<Arc<WebhookSecrets>>, GatewayError> {
        let Some(stored) = self.store.webhook_secrets(business_id).await? else {
            return Ok(None);
        };
        let cipher = self.cipher.as_ref().ok_or_else(|| {
            GatewayError::Configuration(format!(
                "business {business_id} has webhook secrets but no master key is configured"
            ))
        })?;
        let primary = cipher.decrypt(&stored.primary)?;
        let secondary = stored
            .secondary
            .as_deref()
            .map(|blob| cipher.decrypt(blob))
            .transpose()?;
        debug!(%business_id, rotating = secondary.is_some(), "webhook secrets decrypted");
        Ok(Some(Arc::new(WebhookSecrets { primary, secondary })))
    }
}

/// Recover an owned error from one shared between coalesced callers.
fn unshare(shared: Arc<GatewayError>) -> GatewayError {
    Arc::try_unwrap(shared).unwrap_or_else(|shared| match &*shared {
        GatewayError::Store(err) => GatewayError::Store(err.clone()),
        GatewayError::Credential(err) => GatewayError::Credential(err.clone()),
        other => GatewayError::Configuration(other.to_string()),
    })
}
