//! Seed file loading for the in-memory store.
//!
//! A seed is a TOML or JSON document listing businesses (with their plan
//! limits, free-tier limits, and encrypted webhook secrets), customer
//! contexts, and API keys. The server loads one at startup when
//! `[store] seed_path` is set.

use std::path::Path;

use serde::Deserialize;
use tracing::info;

use tracktags_core::{Business, BusinessId, Credential, CustomerContext, PlanLimit};
use tracktags_store::{ApiKeyRecord, EncryptedWebhookSecrets, StoreError, hash_api_key};

use crate::store::MemoryPlanStore;

#[derive(Debug, Default, Deserialize)]
pub struct StoreSeed {
    #[serde(default)]
    pub businesses: Vec<BusinessSeed>,
    #[serde(default)]
    pub customers: Vec<CustomerContext>,
    #[serde(default)]
    pub api_keys: Vec<ApiKeySeed>,
}

#[derive(Debug, Deserialize)]
pub struct BusinessSeed {
    #[serde(flatten)]
    pub business: Business,
    #[serde(default)]
    pub plan_limits: Vec<PlanLimit>,
    #[serde(default)]
    pub free_tier_limits: Vec<PlanLimit>,
    #[serde(default)]
    pub webhook_secrets: Option<EncryptedWebhookSecrets>,
}

/// An API key entry. Either the raw `key` (hashed on load) or its
/// `key_hash` must be given.
#[derive(Debug, Deserialize)]
pub struct ApiKeySeed {
    pub key_id: Credential,
    pub business_id: BusinessId,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub key_hash: Option<String>,
}

impl StoreSeed {
    /// Parse a seed, choosing the format by file extension (`.json` or TOML).
    pub fn from_path(path: &Path) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Connection(format!("{}: {e}", path.display())))?;
        if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json(&raw)
        } else {
            Self::from_toml(&raw)
        }
    }

    pub fn from_toml(raw: &str) -> Result<Self, StoreError> {
        toml::from_str(raw).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self, StoreError> {
        serde_json::from_str(raw).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

impl MemoryPlanStore {
    /// Build a store from a parsed seed, validating every plan limit.
    pub fn from_seed(seed: StoreSeed) -> Result<Self, StoreError> {
        let store = Self::new();
        for entry in seed.businesses {
            for limit in entry.plan_limits.iter().chain(&entry.free_tier_limits) {
                limit
                    .validate()
                    .map_err(|e| StoreError::Invalid(e.to_string()))?;
            }
            let business_id = entry.business.business_id.clone();
            store.put_business(entry.business);
            store.set_plan_limits(&business_id, entry.plan_limits);
            store.set_free_tier_limits(&business_id, entry.free_tier_limits);
            if let Some(secrets) = entry.webhook_secrets {
                store.set_webhook_secrets(&business_id, secrets);
            }
        }
        for context in seed.customers {
            for limit in &context.plan_limits {
                limit
                    .validate()
                    .map_err(|e| StoreError::Invalid(e.to_string()))?;
            }
            store.put_customer(context);
        }
        for key in seed.api_keys {
            let hash = match (key.key_hash, key.key) {
                (Some(hash), _) => hash,
                (None, Some(raw)) => hash_api_key(&raw),
                (None, None) => {
                    return Err(StoreError::Invalid(format!(
                        "api key {} needs either `key` or `key_hash`",
                        key.key_id
                    )));
                }
            };
            store.put_api_key(
                hash,
                ApiKeyRecord {
                    key_id: key.key_id,
                    business_id: key.business_id,
                    revoked: false,
                },
            );
        }
        info!(
            businesses = store.business_count(),
            customers = store.customer_count(),
            "loaded plan store seed"
        );
        Ok(store)
    }

    /// Read and apply a seed file.
    pub fn from_seed_file(path: &Path) -> Result<Self, StoreError> {
        Self::from_seed(StoreSeed::from_path(path)?)
    }
}
