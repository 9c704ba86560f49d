//! Breach webhooks.
//!
//! Delivers [`BreachEvent`]s emitted by metric units to the URLs configured
//! on the breached limit. Bodies are signed with the business's primary
//! webhook secret when it has one.

use std::sync::Arc;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use secrecy::ExposeSecret;
use sha2::Sha256;
use tracing::{debug, warn};

use tracktags_core::BreachEvent;
use tracktags_engine::{BreachNotifier, NotifyError};

use crate::secrets::WebhookSecretCache;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `sha256=<hex hmac of the body>`.
pub const SIGNATURE_HEADER: &str = "x-tracktags-signature";

pub struct WebhookNotifier {
    client: reqwest::Client,
    secrets: Arc<WebhookSecretCache>,
}

impl WebhookNotifier {
    pub fn new(client: reqwest::Client, secrets: Arc<WebhookSecretCache>) -> Self {
        Self { client, secrets }
    }

    async fn signature(&self, event: &BreachEvent, body: &[u8]) -> Option<String> {
        let business_id = event.scope.business_id();
        match self.secrets.get(business_id).await {
            Ok(Some(secrets)) => match sign(secrets.primary.expose_secret(), body) {
                Ok(signature) => Some(signature),
                Err(e) => {
                    warn!(%business_id, error = %e, "breach webhook sent unsigned");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(%business_id, error = %e, "webhook secrets unavailable, sending unsigned");
                None
            }
        }
    }
}

/// HMAC-SHA256 of `body` under `secret`, as `sha256=<hex>`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, NotifyError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| NotifyError(format!("invalid HMAC key: {e}")))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

#[async_trait]
impl BreachNotifier for WebhookNotifier {
    async fn notify(&self, event: &BreachEvent) -> Result<(), NotifyError> {
        if event.webhook_urls.is_empty() {
            return Ok(());
        }
        let body = serde_json::to_vec(event).map_err(|e| NotifyError(e.to_string()))?;
        let signature = self.signature(event, &body).await;

        let mut failures = Vec::new();
        for url in &event.webhook_urls {
            let mut request = self
                .client
                .post(url)
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
            if let Some(signature) = &signature {
                request = request.header(SIGNATURE_HEADER, signature);
            }
            match request
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
            {
                Ok(_) => {
                    debug!(%url, metric = %event.status.metric_name, "breach webhook delivered");
                }
                Err(e) => {
                    warn!(%url, error = %e, "breach webhook failed");
                    failures.push(format!("{url}: {e}"));
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(NotifyError(failures.join("; ")))
        }
    }
}
