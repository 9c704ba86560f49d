use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use tracktags_core::{
    Business, BusinessId, Credential, CustomerContext, CustomerId, PlanLimit, UsageSnapshot,
};

use crate::error::StoreError;

/// A business's webhook signing secrets as stored: encrypted blobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedWebhookSecrets {
    pub primary: String,
    /// Present while a secret rotation is in progress.
    #[serde(default)]
    pub secondary: Option<String>,
}

/// The stored record behind an API key hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    /// Non-secret identifier of the key.
    pub key_id: Credential,
    pub business_id: BusinessId,
    #[serde(default)]
    pub revoked: bool,
}

/// SHA-256 hex digest under which API keys are stored and looked up.
#[must_use]
pub fn hash_api_key(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// The durable record store consulted by the engine and the gateway.
///
/// Implementations must be `Send + Sync` and safe for concurrent access.
/// Reads of absent rows return `Ok(None)` (or an empty list), not
/// [`StoreError::NotFound`].
#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Fetch a business row.
    async fn business(&self, business_id: &BusinessId) -> Result<Option<Business>, StoreError>;

    /// Active plan limits that apply to business-scoped metrics.
    async fn business_plan_limits(
        &self,
        business_id: &BusinessId,
    ) -> Result<Vec<PlanLimit>, StoreError>;

    /// Limits of the business's free tier, applied to customers whose
    /// subscription has lapsed.
    async fn free_tier_limits(&self, business_id: &BusinessId)
    -> Result<Vec<PlanLimit>, StoreError>;

    /// Customer row plus owned machines and active plan limits.
    async fn customer_context(
        &self,
        business_id: &BusinessId,
        customer_id: &CustomerId,
    ) -> Result<Option<CustomerContext>, StoreError>;

    /// Encrypted webhook secrets of a business, if it has any.
    async fn webhook_secrets(
        &self,
        business_id: &BusinessId,
    ) -> Result<Option<EncryptedWebhookSecrets>, StoreError>;

    /// Resolve an API key by its [`hash_api_key`] digest.
    async fn resolve_api_key(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>, StoreError>;

    /// Persist a usage snapshot flushed on a tick.
    async fn save_usage_snapshot(&self, snapshot: &UsageSnapshot) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_hash_is_lowercase_sha256_hex() {
        let hash = hash_api_key("tt_live_abc");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(hash, hash_api_key("tt_live_abc"));
        assert_ne!(hash, hash_api_key("tt_live_abd"));
    }

    #[test]
    fn known_digest() {
        assert_eq!(
            hash_api_key(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
