//! Request and response bodies of the management API.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use tracktags_core::{
    BUSINESS_SCOPE, BusinessId, CustomerId, MetricName, MetricScope, MetricSpec, PlanLimit,
    ScopeError, resolve_scope,
};
use tracktags_engine::EngineMetricsSnapshot;
use tracktags_gateway::GatewayMetricsSnapshot;

fn default_scope() -> String {
    BUSINESS_SCOPE.to_owned()
}

/// `scope` and `customer_id` as sent in a body or query string. The
/// business always comes from the authenticated caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeParams {
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
}

impl ScopeParams {
    pub fn resolve(&self, business_id: &BusinessId) -> Result<MetricScope, ScopeError> {
        resolve_scope(&self.scope, business_id, self.customer_id.as_ref())
    }
}

/// Body of `POST /v1/metrics`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateMetricRequest {
    #[serde(flatten)]
    pub scope: ScopeParams,
    #[serde(flatten)]
    pub spec: MetricSpec,
}

/// Body of `POST /v1/metrics/record`.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordMetricRequest {
    #[serde(flatten)]
    pub scope: ScopeParams,
    pub metric_name: MetricName,
    pub value: f64,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Body of `POST /v1/plan-limits/changed`.
///
/// Without `customer_id` the business's own units are updated. Without
/// `limits` the coordinator reloads them from the store.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanChangeRequest {
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
    #[serde(default)]
    pub limits: Option<Vec<PlanLimit>>,
}

#[derive(Debug, Serialize)]
pub struct PlanChangeResponse {
    pub units_updated: usize,
}

#[derive(Debug, Serialize)]
pub struct BillingResetResponse {
    pub units_reset: usize,
}

#[derive(Debug, Serialize)]
pub struct RecordAccepted {
    pub status: &'static str,
    pub metric_name: MetricName,
}

/// Engine and gateway counters.
#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub engine: EngineMetricsSnapshot,
    pub gateway: GatewayMetricsSnapshot,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub metrics: MetricsResponse,
}

#[cfg(test)]
mod tests {
    use tracktags_core::{MetricType, TickType};

    use super::*;

    #[test]
    fn scope_defaults_to_business() {
        let params: ScopeParams = serde_json::from_str("{}").unwrap();
        let scope = params.resolve(&BusinessId::new("acme")).unwrap();
        assert_eq!(scope, MetricScope::business("acme"));
    }

    #[test]
    fn customer_scope_needs_customer_id() {
        let params: ScopeParams = serde_json::from_str(r#"{"scope":"customer"}"#).unwrap();
        assert!(params.resolve(&BusinessId::new("acme")).is_err());
    }

    #[test]
    fn create_request_flattens_scope_and_spec() {
        let req: CreateMetricRequest = serde_json::from_value(serde_json::json!({
            "scope": "customer",
            "customer_id": "cust_1",
            "metric_name": "api_calls",
            "metric_type": "stripe_billing",
            "tick_type": "1m",
        }))
        .unwrap();
        assert_eq!(req.scope.customer_id, Some(CustomerId::new("cust_1")));
        assert_eq!(req.spec.metric_name, MetricName::new("api_calls"));
        assert_eq!(req.spec.metric_type, MetricType::StripeBilling);
        assert_eq!(req.spec.tick_type, TickType::OneMinute);
    }
}
