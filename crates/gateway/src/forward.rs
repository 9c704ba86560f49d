//! Outbound forwarding of admitted calls.
//!
//! Structural checks (target URL, loops, double proxying) run before any
//! metric lookup. Header construction strips the caller's own credential and
//! hop-by-hop headers, then injects tenant metadata.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::debug;

use tracktags_core::{MetricScope, PlanId};

use crate::error::GatewayError;
use crate::gateway::BreachReport;
use crate::identity::CallerIdentity;
use crate::secrets::WebhookSecrets;

/// Marker set on every forwarded call.
pub const PROXIED_HEADER: &str = "x-tracktags-proxied";
pub const BUSINESS_ID_HEADER: &str = "x-tracktags-business-id";
/// Set on customer-scoped forwards; its presence inbound also marks a
/// double proxy.
pub const CUSTOMER_ID_HEADER: &str = "x-tracktags-customer-id";
pub const SCOPE_HEADER: &str = "x-tracktags-scope";
pub const PLAN_ID_HEADER: &str = "x-tracktags-plan-id";
pub const MACHINE_COUNT_HEADER: &str = "x-tracktags-machine-count";
pub const METRIC_HEADER: &str = "x-tracktags-metric";
pub const USAGE_HEADER: &str = "x-tracktags-usage";
/// JSON array of every checked metric's status (all-limits mode).
pub const LIMITS_HEADER: &str = "x-tracktags-limits";
pub const WEBHOOK_SECRET_HEADER: &str = "x-tracktags-webhook-secret";
pub const WEBHOOK_SECRET_SECONDARY_HEADER: &str = "x-tracktags-webhook-secret-secondary";

const INTERNAL_PREFIX: &str = "x-tracktags-";

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "content-length",
    "host",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, Clone)]
pub struct ForwardConfig {
    /// Host (optionally `host:port`) this service is reachable at. Targets
    /// on this host are loops.
    pub public_host: Option<String>,
    /// Path of this service's proxy endpoint. Targets on this path are loops.
    pub proxy_path: String,
    pub timeout: Duration,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            public_host: None,
            proxy_path: "/proxy".to_owned(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Upstream response returned verbatim to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardedResponse {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// Tenant metadata injected into a forwarded call.
#[derive(Debug, Clone, Copy)]
pub struct ForwardMetadata<'a> {
    pub scope: &'a MetricScope,
    pub plan_id: Option<&'a PlanId>,
    pub machine_count: Option<usize>,
    pub report: &'a BreachReport,
}

pub struct Forwarder {
    client: reqwest::Client,
    config: ForwardConfig,
}

impl Forwarder {
    pub fn new(client: reqwest::Client, config: ForwardConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ForwardConfig {
        &self.config
    }

    /// Parse the target and reject URLs that would route back into this
    /// service.
    pub fn validate_target(&self, target_url: &str) -> Result<Url, GatewayError> {
        let url = Url::parse(target_url.trim())
            .map_err(|e| GatewayError::BadRequest(format!("invalid target_url: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(GatewayError::BadRequest(
                "target_url must start with http:// or https://".to_owned(),
            ));
        }
        let Some(host) = url.host_str() else {
            return Err(GatewayError::BadRequest(format!(
                "target_url has no host: {url}"
            )));
        };

        if let Some(public_host) = &self.config.public_host
            && is_own_host(&url, public_host)
        {
            return Err(GatewayError::LoopDetected(format!(
                "target host {host} is this service"
            )));
        }
        let own_path = self.config.proxy_path.trim_end_matches('/');
        if url.path().trim_end_matches('/') == own_path {
            return Err(GatewayError::LoopDetected(format!(
                "target path {} is the proxy endpoint",
                url.path()
            )));
        }
        Ok(url)
    }

    /// Headers for the outbound call: the caller's headers minus its own
    /// credential, hop-by-hop and internal headers, plus tenant metadata.
    pub fn outbound_headers(
        &self,
        caller_headers: &HashMap<String, String>,
        caller: &CallerIdentity,
        metadata: &ForwardMetadata<'_>,
        secrets: Option<&WebhookSecrets>,
    ) -> Result<HeaderMap, GatewayError> {
        let mut headers = HeaderMap::new();
        for (name, value) in caller_headers {
            let lower = name.trim().to_ascii_lowercase();
            if HOP_BY_HOP.contains(&lower.as_str()) || lower.starts_with(INTERNAL_PREFIX) {
                continue;
            }
            if caller.presents_own_key(value) {
                debug!(header = %lower, "caller credential stripped from forwarded headers");
                continue;
            }
            let header_name = HeaderName::from_bytes(lower.as_bytes())
                .map_err(|_| GatewayError::BadRequest(format!("invalid header name '{name}'")))?;
            let header_value = HeaderValue::from_str(value).map_err(|_| {
                GatewayError::BadRequest(format!("invalid value for header '{name}'"))
            })?;
            headers.append(header_name, header_value);
        }

        let scope = metadata.scope;
        put(&mut headers, PROXIED_HEADER, "true")?;
        put(&mut headers, BUSINESS_ID_HEADER, scope.business_id())?;
        put(&mut headers, SCOPE_HEADER, scope.tag())?;
        if let Some(customer_id) = scope.customer_id() {
            put(&mut headers, CUSTOMER_ID_HEADER, customer_id)?;
        }
        if let Some(plan_id) = metadata.plan_id {
            put(&mut headers, PLAN_ID_HEADER, plan_id)?;
        }
        if let Some(count) = metadata.machine_count {
            put(&mut headers, MACHINE_COUNT_HEADER, &count.to_string())?;
        }
        match metadata.report {
            BreachReport::Single(status) => {
                put(&mut headers, METRIC_HEADER, &status.metric_name)?;
                put(&mut headers, USAGE_HEADER, &status.current_usage.to_string())?;
            }
            BreachReport::All(statuses) => {
                let json = serde_json::to_string(statuses).map_err(|e| {
                    GatewayError::Configuration(format!("limits header encoding: {e}"))
                })?;
                put(&mut headers, LIMITS_HEADER, &json)?;
            }
        }
        if let Some(secrets) = secrets {
            put(
                &mut headers,
                WEBHOOK_SECRET_HEADER,
                secrets.primary.expose_secret(),
            )?;
            if let Some(secondary) = &secrets.secondary {
                put(
                    &mut headers,
                    WEBHOOK_SECRET_SECONDARY_HEADER,
                    secondary.expose_secret(),
                )?;
            }
        }
        Ok(headers)
    }

    /// Send the call and capture the upstream response.
    pub async fn send(
        &self,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: Option<String>,
    ) -> Result<ForwardedResponse, GatewayError> {
        let mut request = self
            .client
            .request(method, url)
            .headers(headers)
            .timeout(self.config.timeout);
        if let Some(body) = body {
            request = request.body(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;

        let status_code = response.status().as_u16();
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in response.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            headers
                .entry(name.as_str().to_owned())
                .and_modify(|joined| {
                    joined.push_str(", ");
                    joined.push_str(&value);
                })
                .or_insert(value);
        }
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Upstream(e.to_string()))?;
        Ok(ForwardedResponse {
            status_code,
            headers,
            body,
        })
    }
}

/// Caller-supplied method, `GET` when absent.
pub fn parse_method(method: Option<&str>) -> Result<Method, GatewayError> {
    match method.map(str::trim) {
        None | Some("") => Ok(Method::GET),
        Some(raw) => Method::from_bytes(raw.to_ascii_uppercase().as_bytes())
            .map_err(|_| GatewayError::BadRequest(format!("invalid method '{raw}'"))),
    }
}

/// Reject calls that already passed through a TrackTags proxy, judged by
/// the inbound request headers and the headers it asks to forward.
pub fn check_double_proxy(
    inbound: &HeaderMap,
    forwarded: &HashMap<String, String>,
) -> Result<(), GatewayError> {
    let marked = |name: &str| {
        name.eq_ignore_ascii_case(PROXIED_HEADER) || name.eq_ignore_ascii_case(CUSTOMER_ID_HEADER)
    };
    if inbound.keys().any(|name| marked(name.as_str())) || forwarded.keys().any(|name| marked(name))
    {
        return Err(GatewayError::DoubleProxyDetected);
    }
    Ok(())
}

fn is_own_host(url: &Url, public_host: &str) -> bool {
    let public = public_host
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    let (host, port) = match public.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) => (host, Some(port)),
            Err(_) => (public, None),
        },
        None => (public, None),
    };
    let same_host = url
        .host_str()
        .is_some_and(|target| target.eq_ignore_ascii_case(host));
    same_host && port.is_none_or(|port| url.port_or_known_default() == Some(port))
}

fn put(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<(), GatewayError> {
    let value = HeaderValue::from_str(value).map_err(|_| {
        GatewayError::Configuration(format!("value for {name} is not a valid header"))
    })?;
    headers.insert(HeaderName::from_static(name), value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use tracktags_core::{BreachStatus, Credential, MetricName};

    use super::*;

    fn forwarder(public_host: Option<&str>) -> Forwarder {
        Forwarder::new(
            reqwest::Client::new(),
            ForwardConfig {
                public_host: public_host.map(str::to_owned),
                ..ForwardConfig::default()
            },
        )
    }

    #[test]
    fn rejects_non_http_targets() {
        let f = forwarder(None);
        for bad in ["ftp://files.example.com/x", "api.example.com/v1", "not a url"] {
            assert!(
                matches!(f.validate_target(bad), Err(GatewayError::BadRequest(_))),
                "{bad}"
            );
        }
        assert!(f.validate_target("https://api.example.com/v1/chat").is_ok());
    }

    #[test]
    fn own_host_is_a_loop() {
        let f = forwarder(Some("api.tracktags.com"));
        let err = f
            .validate_target("https://API.tracktags.com/v1/anything")
            .unwrap_err();
        assert!(matches!(err, GatewayError::LoopDetected(_)));
        assert!(f.validate_target("https://api.example.com/v1").is_ok());
    }

    #[test]
    fn own_host_with_port_only_matches_that_port() {
        let f = forwarder(Some("http://localhost:4000/"));
        assert!(matches!(
            f.validate_target("http://localhost:4000/v1"),
            Err(GatewayError::LoopDetected(_))
        ));
        assert!(f.validate_target("http://localhost:9000/v1").is_ok());
    }

    #[test]
    fn proxy_path_is_a_loop_on_any_host() {
        let f = forwarder(None);
        for target in ["https://other.example.com/proxy", "https://other.example.com/proxy/"] {
            assert!(matches!(
                f.validate_target(target),
                Err(GatewayError::LoopDetected(_))
            ));
        }
        assert!(f.validate_target("https://other.example.com/proxy/v2").is_ok());
    }

    #[test]
    fn forwarding_markers_mean_double_proxy() {
        let mut inbound = HeaderMap::new();
        inbound.insert(
            HeaderName::from_static(CUSTOMER_ID_HEADER),
            HeaderValue::from_static("cust_1"),
        );
        assert!(matches!(
            check_double_proxy(&inbound, &HashMap::new()),
            Err(GatewayError::DoubleProxyDetected)
        ));

        let forwarded = HashMap::from([("X-TrackTags-Proxied".to_owned(), "true".to_owned())]);
        assert!(check_double_proxy(&HeaderMap::new(), &forwarded).is_err());
        assert!(check_double_proxy(&HeaderMap::new(), &HashMap::new()).is_ok());
    }

    #[test]
    fn method_defaults_to_get() {
        assert_eq!(parse_method(None).unwrap(), Method::GET);
        assert_eq!(parse_method(Some("post")).unwrap(), Method::POST);
        assert!(parse_method(Some("GE T")).is_err());
    }

    #[test]
    fn outbound_headers_strip_credential_and_inject_metadata() {
        let f = forwarder(None);
        let caller = CallerIdentity::new("acme")
            .with_key(Credential::new("key_1"), SecretString::new("tt_secret".into()));
        let scope = MetricScope::customer("acme", "cust_1");
        let plan = PlanId::new("pro");
        let report = BreachReport::Single(BreachStatus::evaluate(
            MetricName::new("api_calls"),
            12.0,
            None,
        ));
        let metadata = ForwardMetadata {
            scope: &scope,
            plan_id: Some(&plan),
            machine_count: Some(2),
            report: &report,
        };
        let caller_headers = HashMap::from([
            ("Authorization".to_owned(), "Bearer tt_secret".to_owned()),
            ("X-Upstream-Key".to_owned(), "sk-third-party".to_owned()),
            ("Connection".to_owned(), "keep-alive".to_owned()),
            ("X-TrackTags-Plan-Id".to_owned(), "spoofed".to_owned()),
        ]);

        let headers = f
            .outbound_headers(&caller_headers, &caller, &metadata, None)
            .unwrap();
        assert!(headers.get("authorization").is_none());
        assert!(headers.get("connection").is_none());
        assert_eq!(headers["x-upstream-key"], "sk-third-party");
        assert_eq!(headers[PROXIED_HEADER], "true");
        assert_eq!(headers[BUSINESS_ID_HEADER], "acme");
        assert_eq!(headers[CUSTOMER_ID_HEADER], "cust_1");
        assert_eq!(headers[SCOPE_HEADER], "customer");
        assert_eq!(headers[PLAN_ID_HEADER], "pro");
        assert_eq!(headers[MACHINE_COUNT_HEADER], "2");
        assert_eq!(headers[METRIC_HEADER], "api_calls");
        assert_eq!(headers[USAGE_HEADER], "12");
        assert!(headers.get(WEBHOOK_SECRET_HEADER).is_none());
    }

    #[test]
    fn unresolved_caller_key_is_not_forwarded() {
        let f = forwarder(None);
        let caller =
            CallerIdentity::new("dev").with_presented_key(SecretString::new("tt_dev_key".into()));
        let scope = MetricScope::business("dev");
        let report = BreachReport::All(Vec::new());
        let metadata = ForwardMetadata {
            scope: &scope,
            plan_id: None,
            machine_count: None,
            report: &report,
        };
        let caller_headers = HashMap::from([
            ("X-API-Key".to_owned(), "tt_dev_key".to_owned()),
            ("Authorization".to_owned(), "Bearer sk-third-party".to_owned()),
        ]);

        let headers = f
            .outbound_headers(&caller_headers, &caller, &metadata, None)
            .unwrap();
        assert!(headers.get("x-api-key").is_none());
        assert_eq!(headers["authorization"], "Bearer sk-third-party");
    }

    #[test]
    fn all_limits_report_becomes_json_header_and_secrets_are_attached() {
        let f = forwarder(None);
        let scope = MetricScope::business("acme");
        let report = BreachReport::All(vec![BreachStatus::evaluate(
            MetricName::new("seats"),
            1.0,
            None,
        )]);
        let metadata = ForwardMetadata {
            scope: &scope,
            plan_id: None,
            machine_count: None,
            report: &report,
        };
        let secrets = WebhookSecrets {
            primary: SecretString::new("whsec_a".into()),
            secondary: Some(SecretString::new("whsec_b".into())),
        };

        let headers = f
            .outbound_headers(
                &HashMap::new(),
                &CallerIdentity::new("acme"),
                &metadata,
                Some(&secrets),
            )
            .unwrap();
        let limits: Vec<BreachStatus> =
            serde_json::from_str(headers[LIMITS_HEADER].to_str().unwrap()).unwrap();
        assert_eq!(limits.len(), 1);
        assert_eq!(limits[0].metric_name.as_str(), "seats");
        assert_eq!(headers[WEBHOOK_SECRET_HEADER], "whsec_a");
        assert_eq!(headers[WEBHOOK_SECRET_SECONDARY_HEADER], "whsec_b");
        assert!(headers.get(CUSTOMER_ID_HEADER).is_none());
    }
}
