pub mod middleware;

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use secrecy::SecretString;
use tracing::debug;

use tracktags_core::BusinessId;
use tracktags_gateway::CallerIdentity;
use tracktags_store::{PlanStore, hash_api_key};

use crate::error::ServerError;

/// Alternative header for the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

enum Mode {
    ApiKeys,
    Disabled { business_id: BusinessId },
}

/// Turns the credentials of an incoming request into a [`CallerIdentity`].
///
/// Keys are looked up in the plan store by their SHA-256 digest; the raw
/// key is only kept in the identity so the forwarder can strip it.
pub struct Authenticator {
    store: Arc<dyn PlanStore>,
    mode: Mode,
}

impl Authenticator {
    pub fn api_keys(store: Arc<dyn PlanStore>) -> Self {
        Self {
            store,
            mode: Mode::ApiKeys,
        }
    }

    /// Every request acts as `business_id`.
    pub fn disabled(store: Arc<dyn PlanStore>, business_id: impl Into<BusinessId>) -> Self {
        Self {
            store,
            mode: Mode::Disabled {
                business_id: business_id.into(),
            },
        }
    }

    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<CallerIdentity, ServerError> {
        if let Mode::Disabled { business_id } = &self.mode {
            let caller = CallerIdentity::new(business_id.clone());
            return Ok(match presented_key(headers) {
                Some(raw) => caller.with_presented_key(SecretString::new(raw.to_owned())),
                None => caller,
            });
        }
        let raw = presented_key(headers)
            .ok_or_else(|| ServerError::Unauthorized("missing API key".into()))?;
        let record = self
            .store
            .resolve_api_key(&hash_api_key(raw))
            .await?
            .filter(|record| !record.revoked)
            .ok_or_else(|| ServerError::Unauthorized("invalid API key".into()))?;
        debug!(business_id = %record.business_id, key_id = %record.key_id, "caller authenticated");
        Ok(CallerIdentity::new(record.business_id)
            .with_key(record.key_id, SecretString::new(raw.to_owned())))
    }
}

/// The API key carried by `Authorization: Bearer <key>` or `X-API-Key`.
pub fn presented_key(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            let v = v.trim();
            v.get(..7)
                .filter(|prefix| prefix.eq_ignore_ascii_case("bearer "))
                .map(|_| v[7..].trim())
        });
    bearer
        .or_else(|| {
            headers
                .get(API_KEY_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
        })
        .filter(|key| !key.is_empty())
}

#[cfg(test)]
mod tests {
    use tracktags_core::{Business, Credential};
    use tracktags_store::ApiKeyRecord;
    use tracktags_store_memory::MemoryPlanStore;

    use super::*;

    fn store() -> Arc<dyn PlanStore> {
        let store = MemoryPlanStore::new();
        store.put_business(Business::new("acme"));
        store.put_api_key(
            hash_api_key("tt_live_good"),
            ApiKeyRecord {
                key_id: Credential::new("key_1"),
                business_id: BusinessId::new("acme"),
                revoked: false,
            },
        );
        store.put_api_key(
            hash_api_key("tt_live_revoked"),
            ApiKeyRecord {
                key_id: Credential::new("key_2"),
                business_id: BusinessId::new("acme"),
                revoked: true,
            },
        );
        Arc::new(store)
    }

    fn headers(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, value.parse().unwrap());
        headers
    }

    #[test]
    fn key_from_bearer_or_api_key_header() {
        assert_eq!(
            presented_key(&headers("authorization", "Bearer tt_live_good")),
            Some("tt_live_good")
        );
        assert_eq!(
            presented_key(&headers("authorization", "bearer  tt_live_good ")),
            Some("tt_live_good")
        );
        assert_eq!(
            presented_key(&headers("x-api-key", "tt_live_good")),
            Some("tt_live_good")
        );
        assert_eq!(presented_key(&headers("authorization", "Basic abc")), None);
        assert_eq!(presented_key(&headers("x-api-key", "  ")), None);
        assert_eq!(presented_key(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn known_key_resolves_to_its_business() {
        let auth = Authenticator::api_keys(store());
        let caller = auth
            .authenticate(&headers("authorization", "Bearer tt_live_good"))
            .await
            .unwrap();
        assert_eq!(caller.business_id, BusinessId::new("acme"));
        assert_eq!(caller.key_id, Some(Credential::new("key_1")));
        assert!(caller.presents_own_key("Bearer tt_live_good"));
    }

    #[tokio::test]
    async fn unknown_revoked_and_missing_keys_are_rejected() {
        let auth = Authenticator::api_keys(store());
        for headers in [
            headers("x-api-key", "tt_live_unknown"),
            headers("x-api-key", "tt_live_revoked"),
            HeaderMap::new(),
        ] {
            let err = auth.authenticate(&headers).await.unwrap_err();
            assert!(matches!(err, ServerError::Unauthorized(_)));
        }
    }

    #[tokio::test]
    async fn disabled_mode_uses_dev_business() {
        let auth = Authenticator::disabled(store(), "dev");
        let caller = auth.authenticate(&HeaderMap::new()).await.unwrap();
        assert_eq!(caller.business_id, BusinessId::new("dev"));
        assert!(caller.key_id.is_none());
    }

    #[tokio::test]
    async fn disabled_mode_still_holds_a_presented_key() {
        let auth = Authenticator::disabled(store(), "dev");
        let caller = auth
            .authenticate(&headers("authorization", "Bearer tt_live_anything"))
            .await
            .unwrap();
        assert_eq!(caller.business_id, BusinessId::new("dev"));
        assert!(caller.key_id.is_none());
        assert!(caller.presents_own_key("Bearer tt_live_anything"));
        assert!(caller.presents_own_key("tt_live_anything"));
    }
}
