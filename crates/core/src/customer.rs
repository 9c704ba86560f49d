use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::limit::PlanLimit;
use crate::types::{BusinessId, CustomerId, MetricName, PlanId};

/// A business (top-level tenant) as stored by the plan store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Business {
    pub business_id: BusinessId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub plan_id: Option<PlanId>,
}

impl Business {
    pub fn new(business_id: impl Into<BusinessId>) -> Self {
        Self {
            business_id: business_id.into(),
            name: String::new(),
            plan_id: None,
        }
    }
}

/// A customer row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub customer_id: CustomerId,
    pub business_id: BusinessId,
    #[serde(default)]
    pub plan_id: Option<PlanId>,
    /// End of the paid subscription period, if any.
    #[serde(default)]
    pub subscription_ends_at: Option<DateTime<Utc>>,
}

impl Customer {
    pub fn new(business_id: impl Into<BusinessId>, customer_id: impl Into<CustomerId>) -> Self {
        Self {
            customer_id: customer_id.into(),
            business_id: business_id.into(),
            plan_id: None,
            subscription_ends_at: None,
        }
    }

    /// Whether the subscription ended strictly before `now`.
    #[must_use]
    pub fn subscription_expired(&self, now: DateTime<Utc>) -> bool {
        self.subscription_ends_at.is_some_and(|ends| ends < now)
    }
}

/// A machine owned by a customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub machine_id: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Customer row plus owned machines and active plan limits, fetched together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerContext {
    pub customer: Customer,
    #[serde(default)]
    pub machines: Vec<Machine>,
    #[serde(default)]
    pub plan_limits: Vec<PlanLimit>,
}

impl CustomerContext {
    pub fn new(customer: Customer) -> Self {
        Self {
            customer,
            machines: Vec::new(),
            plan_limits: Vec::new(),
        }
    }

    #[must_use]
    pub fn machine_count(&self) -> usize {
        self.machines.len()
    }

    /// First active plan limit for `metric_name`, ignoring metric type.
    #[must_use]
    pub fn limit_for(&self, metric_name: &MetricName) -> Option<&PlanLimit> {
        self.plan_limits
            .iter()
            .find(|l| &l.metric_name == metric_name)
    }
}
