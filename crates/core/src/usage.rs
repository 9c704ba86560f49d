use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::limit::BreachStatus;
use crate::metric::{MetricOperation, MetricType, TickType};
use crate::scope::MetricScope;
use crate::types::{Credential, MetricName};

/// Value of one unit captured on a tick, before the reset policy runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    #[serde(flatten)]
    pub scope: MetricScope,
    pub metric_name: MetricName,
    pub value: f64,
    pub operation: MetricOperation,
    pub metric_type: MetricType,
    pub tick_type: TickType,
    pub recorded_at: DateTime<Utc>,
    /// Credential the unit was created under.
    #[serde(default)]
    pub created_by: Option<Credential>,
}

/// Emitted once when a webhook-action limit becomes breached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreachEvent {
    #[serde(flatten)]
    pub scope: MetricScope,
    pub status: BreachStatus,
    pub webhook_urls: Vec<String>,
    pub occurred_at: DateTime<Utc>,
}
