use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use tracktags_core::{
    BreachStatus, CustomerId, LimitConfig, MetricName, MetricScope, PlanId, PlanLimit,
    find_plan_limit, resolve_scope,
};
use tracktags_engine::{EngineError, MetricDirectoryReader, MetricHandle};
use tracktags_store::PlanStore;

use crate::builder::GatewayBuilder;
use crate::domain::DomainAuthorizer;
use crate::error::GatewayError;
use crate::forward::{
    ForwardMetadata, ForwardedResponse, Forwarder, check_double_proxy, parse_method,
};
use crate::identity::CallerIdentity;
use crate::metrics::GatewayMetrics;
use crate::secrets::WebhookSecretCache;

/// Body of `POST /proxy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyRequest {
    /// `"business"` or `"customer"`.
    pub scope: String,
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
    /// Empty selects all-limits mode.
    #[serde(default)]
    pub metric_name: String,
    pub target_url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

/// Limit state attached to an admitted call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BreachReport {
    /// Single-metric mode.
    Single(BreachStatus),
    /// All-limits mode: every checked metric that has a running unit.
    All(Vec<BreachStatus>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProxyOutcome {
    Allowed {
        breach_status: BreachReport,
        forwarded_response: ForwardedResponse,
    },
    Denied {
        breach_status: BreachStatus,
        error: String,
        /// Seconds until the breached metric resets, when it resets.
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after: Option<u64>,
    },
}

impl ProxyOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    fn denied(breach_status: BreachStatus) -> Self {
        let error = format!(
            "usage limit exceeded for metric '{}'",
            breach_status.metric_name
        );
        let retry_after = breach_status.resets_in_seconds;
        Self::Denied {
            breach_status,
            error,
            retry_after,
        }
    }
}

/// What the gateway needs to know about the tenant of one call.
struct TenantView {
    plan_id: Option<PlanId>,
    machine_count: Option<usize>,
    /// Active limits; the business free tier for lapsed customers.
    limits: Vec<PlanLimit>,
    on_free_tier: bool,
}

/// Admission control in front of third-party calls.
///
/// The gateway only ever looks units up through a [`MetricDirectoryReader`].
/// A metric without a running unit is reported as not provisioned; it is
/// never created from here.
pub struct AdmissionGateway {
    pub(crate) reader: MetricDirectoryReader,
    pub(crate) store: Arc<dyn PlanStore>,
    pub(crate) forwarder: Forwarder,
    pub(crate) domains: DomainAuthorizer,
    pub(crate) secrets: Arc<WebhookSecretCache>,
    pub(crate) metrics: Arc<GatewayMetrics>,
}

impl AdmissionGateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    pub fn webhook_secrets(&self) -> &Arc<WebhookSecretCache> {
        &self.secrets
    }

    /// Check the caller's limits and, when admitted, forward the call.
    ///
    /// `inbound` are the headers of the request that reached this service;
    /// they are only inspected for forwarding markers.
    #[instrument(
        name = "gateway.check_and_forward",
        skip_all,
        fields(
            business_id = %caller.business_id,
            scope = %request.scope,
            metric = %request.metric_name
        )
    )]
    pub async fn check_and_forward(
        &self,
        caller: &CallerIdentity,
        request: ProxyRequest,
        inbound: &HeaderMap,
    ) -> Result<ProxyOutcome, GatewayError> {
        let result = self.admit(caller, request, inbound).await;
        self.observe(&result);
        result
    }

    async fn admit(
        &self,
        caller: &CallerIdentity,
        request: ProxyRequest,
        inbound: &HeaderMap,
    ) -> Result<ProxyOutcome, GatewayError> {
        let scope = resolve_scope(
            &request.scope,
            &caller.business_id,
            request.customer_id.as_ref(),
        )?;
        let target = self.forwarder.validate_target(&request.target_url)?;
        let method = parse_method(request.method.as_deref())?;
        check_double_proxy(inbound, &request.headers)?;

        let metric_name = MetricName::new(request.metric_name.trim());
        let single = !metric_name.is_blank();
        let tenant = self.tenant_view(&scope, !single).await?;

        let report = if single {
            match self.check_single(&scope, &metric_name, &tenant).await? {
                Ok(status) => BreachReport::Single(status),
                Err(denied) => return Ok(ProxyOutcome::denied(denied)),
            }
        } else {
            match self.check_all(&scope, &tenant).await? {
                Ok(statuses) => BreachReport::All(statuses),
                Err(denied) => return Ok(ProxyOutcome::denied(denied)),
            }
        };

        self.domains.authorize(&caller.business_id, &target).await?;
        let secrets = match &scope {
            MetricScope::Business { business_id } => self.secrets.get(business_id).await?,
            MetricScope::Customer { .. } => None,
        };
        let metadata = ForwardMetadata {
            scope: &scope,
            plan_id: tenant.plan_id.as_ref(),
            machine_count: tenant.machine_count,
            report: &report,
        };
        let headers = self.forwarder.outbound_headers(
            &request.headers,
            caller,
            &metadata,
            secrets.as_deref(),
        )?;
        let forwarded_response = self
            .forwarder
            .send(method, target, headers, request.body)
            .await?;
        debug!(status = forwarded_response.status_code, "call forwarded");
        Ok(ProxyOutcome::Allowed {
            breach_status: report,
            forwarded_response,
        })
    }

    /// `Ok(Err(status))` when the metric's deny limit is breached.
    async fn check_single(
        &self,
        scope: &MetricScope,
        metric_name: &MetricName,
        tenant: &TenantView,
    ) -> Result<Result<BreachStatus, BreachStatus>, GatewayError> {
        let not_provisioned = || GatewayError::NotProvisioned {
            metric: metric_name.clone(),
            scope: scope.clone(),
        };
        let unit = self
            .reader
            .lookup(scope, metric_name)
            .ok_or_else(not_provisioned)?;
        let limit_override = if tenant.on_free_tier {
            find_plan_limit(&tenant.limits, metric_name, unit.metric_type())
                .map(PlanLimit::to_limit_config)
        } else {
            None
        };
        let status = match self.query(&unit, limit_override).await {
            Err(GatewayError::Engine(EngineError::Stopped(_))) => return Err(not_provisioned()),
            other => other?,
        };
        Ok(if status.denies() { Err(status) } else { Ok(status) })
    }

    /// Statuses of every active limit with a running unit, or the first
    /// breached deny limit.
    async fn check_all(
        &self,
        scope: &MetricScope,
        tenant: &TenantView,
    ) -> Result<Result<Vec<BreachStatus>, BreachStatus>, GatewayError> {
        let mut statuses = Vec::with_capacity(tenant.limits.len());
        for limit in &tenant.limits {
            let Some(unit) = self.reader.lookup(scope, &limit.metric_name) else {
                debug!(metric = %limit.metric_name, "no running unit, limit skipped");
                continue;
            };
            if !limit.applies_to(unit.metric_type()) {
                continue;
            }
            let status = match self.query(&unit, Some(limit.to_limit_config())).await {
                Err(GatewayError::Engine(EngineError::Stopped(_))) => continue,
                other => other?,
            };
            if status.denies() {
                return Ok(Err(status));
            }
            statuses.push(status);
        }
        Ok(Ok(statuses))
    }

    async fn query(
        &self,
        unit: &MetricHandle,
        limit_override: Option<LimitConfig>,
    ) -> Result<BreachStatus, GatewayError> {
        Ok(unit
            .limit_status(limit_override, self.reader.ask_timeout())
            .await?)
    }

    async fn tenant_view(
        &self,
        scope: &MetricScope,
        load_limits: bool,
    ) -> Result<TenantView, GatewayError> {
        match scope {
            MetricScope::Business { business_id } => {
                let plan_id = self
                    .store
                    .business(business_id)
                    .await?
                    .and_then(|business| business.plan_id);
                let limits = if load_limits {
                    self.store.business_plan_limits(business_id).await?
                } else {
                    Vec::new()
                };
                Ok(TenantView {
                    plan_id,
                    machine_count: None,
                    limits,
                    on_free_tier: false,
                })
            }
            MetricScope::Customer {
                business_id,
                customer_id,
            } => {
                let context = self
                    .store
                    .customer_context(business_id, customer_id)
                    .await?
                    .ok_or_else(|| {
                        GatewayError::UnknownCustomer(format!(
                            "{customer_id} of business {business_id}"
                        ))
                    })?;
                let on_free_tier = context.customer.subscription_expired(Utc::now());
                let limits = if on_free_tier {
                    info!(%customer_id, "subscription lapsed, checking free-tier limits");
                    self.store.free_tier_limits(business_id).await?
                } else {
                    context.plan_limits.clone()
                };
                Ok(TenantView {
                    plan_id: context.customer.plan_id.clone(),
                    machine_count: Some(context.machine_count()),
                    limits,
                    on_free_tier,
                })
            }
        }
    }

    fn observe(&self, result: &Result<ProxyOutcome, GatewayError>) {
        let m = &self.metrics;
        match result {
            Ok(ProxyOutcome::Allowed { .. }) => m.increment_allowed(),
            Ok(ProxyOutcome::Denied { breach_status, .. }) => {
                m.increment_denied();
                info!(
                    metric = %breach_status.metric_name,
                    current_usage = breach_status.current_usage,
                    "call denied"
                );
            }
            Err(err) => {
                match err {
                    GatewayError::NotProvisioned { .. } => m.increment_not_provisioned(),
                    GatewayError::LoopDetected(_) => m.increment_loops_rejected(),
                    GatewayError::DoubleProxyDetected => m.increment_double_proxies_rejected(),
                    GatewayError::AuthorizationDenied { .. } => m.increment_domains_refused(),
                    GatewayError::Upstream(_) => m.increment_upstream_errors(),
                    GatewayError::Timeout(_) => m.increment_timeouts(),
                    _ => {}
                }
                warn!(error = %err, "proxy call rejected");
            }
        }
    }
}
