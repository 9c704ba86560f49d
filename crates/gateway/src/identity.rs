use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};

use tracktags_core::{BusinessId, Credential};

/// The authenticated caller of a proxied request.
///
/// Holds the raw API key the caller presented so the forwarder can make sure
/// it is never sent on to a third party.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub business_id: BusinessId,
    /// Non-secret id of the presented key.
    pub key_id: Option<Credential>,
    api_key: Option<Arc<SecretString>>,
}

impl CallerIdentity {
    /// An identity without a presented key (authentication disabled).
    pub fn new(business_id: impl Into<BusinessId>) -> Self {
        Self {
            business_id: business_id.into(),
            key_id: None,
            api_key: None,
        }
    }

    #[must_use]
    pub fn with_key(mut self, key_id: Credential, api_key: SecretString) -> Self {
        self.key_id = Some(key_id);
        self.with_presented_key(api_key)
    }

    /// Hold a key the caller sent that was never resolved, so it is still
    /// stripped before forwarding.
    #[must_use]
    pub fn with_presented_key(mut self, api_key: SecretString) -> Self {
        self.api_key = Some(Arc::new(api_key));
        self
    }

    /// Whether a header value carries this caller's own API key, bare or as
    /// a bearer token.
    pub fn presents_own_key(&self, header_value: &str) -> bool {
        let Some(key) = &self.api_key else {
            return false;
        };
        let value = header_value.trim();
        let token = match value.get(..7) {
            Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => value[7..].trim(),
            _ => value,
        };
        !token.is_empty() && token == key.expose_secret().as_str()
    }
}
