//! Target-domain authorization.
//!
//! A third-party domain opts in to receiving proxied calls by serving
//! `/.tracktags.json` with the list of business ids it accepts (`"*"` for
//! any). Files are cached per authority (`host[:port]`).

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tracktags_core::BusinessId;

use crate::cache::TtlCache;
use crate::error::GatewayError;

/// Path of the authorization file on the target domain.
pub const AUTHORIZATION_FILE: &str = "/.tracktags.json";

/// Entry in `authorized_businesses` that admits every business.
pub const WILDCARD: &str = "*";

const DOMAIN_CACHE: &str = "domain_auth";

/// Body of a domain's authorization file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationFile {
    #[serde(default)]
    pub authorized_businesses: Vec<String>,
}

impl AuthorizationFile {
    pub fn authorizes(&self, business_id: &BusinessId) -> bool {
        self.authorized_businesses
            .iter()
            .any(|entry| entry == WILDCARD || entry == business_id.as_str())
    }
}

/// Decides whether a business may forward calls to a target domain.
pub struct DomainAuthorizer {
    client: reqwest::Client,
    cache: TtlCache<Arc<AuthorizationFile>>,
    ttl: Duration,
    scheme: String,
    fail_open: bool,
}

impl DomainAuthorizer {
    /// `fail_open` treats an unreachable or unreadable authorization file as
    /// authorized. It is meant for development without a public host.
    pub fn new(
        client: reqwest::Client,
        cache_capacity: u64,
        ttl: Duration,
        scheme: impl Into<String>,
        fail_open: bool,
    ) -> Self {
        Self {
            client,
            cache: TtlCache::new(cache_capacity, ttl),
            ttl,
            scheme: scheme.into(),
            fail_open,
        }
    }

    pub async fn authorize(
        &self,
        business_id: &BusinessId,
        target: &Url,
    ) -> Result<(), GatewayError> {
        let domain = authority(target)?;
        let file = match self
            .cache
            .fetch(DOMAIN_CACHE, &domain, self.ttl, || self.fetch_file(&domain))
            .await
        {
            Ok(file) => file,
            Err(err) if self.fail_open => {
                warn!(%domain, error = %err, "domain authorization unavailable, allowing");
                return Ok(());
            }
            Err(err) => return Err(GatewayError::Upstream(err.to_string())),
        };

        if file.authorizes(business_id) {
            debug!(%domain, %business_id, "domain authorized");
            Ok(())
        } else {
            Err(GatewayError::AuthorizationDenied {
                domain,
                business_id: business_id.to_string(),
            })
        }
    }

    async fn fetch_file(&self, domain: &str) -> Result<Arc<AuthorizationFile>, String> {
        let url = format!("{}://{domain}{AUTHORIZATION_FILE}", self.scheme);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| format!("GET {url}: {e}"))?;
        let file = response
            .json::<AuthorizationFile>()
            .await
            .map_err(|e| format!("GET {url}: malformed authorization file: {e}"))?;
        Ok(Arc::new(file))
    }
}

/// `host[:port]` of a target URL, the unit of domain authorization.
pub(crate) fn authority(url: &Url) -> Result<String, GatewayError> {
    let host = url
        .host_str()
        .ok_or_else(|| GatewayError::BadRequest(format!("target_url has no host: {url}")))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    })
}
