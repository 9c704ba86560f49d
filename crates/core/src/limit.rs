use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::metric::MetricType;
use crate::types::MetricName;

/// Comparison applied between current usage and a limit value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitOperator {
    /// Breached when usage is strictly greater than the limit.
    Gt,
    /// Breached when usage reaches the limit.
    #[default]
    Gte,
    /// Breached when usage is strictly below the limit.
    Lt,
    /// Breached when usage is at or below the limit.
    Lte,
    /// Breached when usage equals the limit exactly.
    Eq,
}

impl LimitOperator {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Eq => "eq",
        }
    }
}

impl FromStr for LimitOperator {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gt" => Ok(Self::Gt),
            "gte" => Ok(Self::Gte),
            "lt" => Ok(Self::Lt),
            "lte" => Ok(Self::Lte),
            "eq" => Ok(Self::Eq),
            _ => Err(CoreError::UnknownLimitOperator(s.to_owned())),
        }
    }
}

impl fmt::Display for LimitOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the system does once a limit is breached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreachAction {
    /// Refuse admission.
    #[default]
    Deny,
    /// Admit and let usage run past the limit.
    AllowOverage,
    /// Admit and notify the configured webhooks.
    Webhook,
    /// Admit; the business is expected to scale capacity.
    Scale,
    /// Admit unconditionally.
    Allow,
}

impl BreachAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deny => "deny",
            Self::AllowOverage => "allow_overage",
            Self::Webhook => "webhook",
            Self::Scale => "scale",
            Self::Allow => "allow",
        }
    }
}

impl FromStr for BreachAction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deny" => Ok(Self::Deny),
            "allow_overage" => Ok(Self::AllowOverage),
            "webhook" => Ok(Self::Webhook),
            "scale" => Ok(Self::Scale),
            "allow" => Ok(Self::Allow),
            _ => Err(CoreError::UnknownBreachAction(s.to_owned())),
        }
    }
}

impl fmt::Display for BreachAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The limit attached to one tracking unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitConfig {
    pub limit_value: f64,
    #[serde(default)]
    pub limit_operator: LimitOperator,
    #[serde(default)]
    pub breach_action: BreachAction,
    /// Notification targets for [`BreachAction::Webhook`].
    #[serde(default)]
    pub webhook_urls: Vec<String>,
}

impl LimitConfig {
    pub fn new(
        limit_value: f64,
        limit_operator: LimitOperator,
        breach_action: BreachAction,
    ) -> Self {
        Self {
            limit_value,
            limit_operator,
            breach_action,
            webhook_urls: Vec::new(),
        }
    }

    /// Reject non-finite values and webhook targets that are not http(s).
    pub fn validate(&self, metric: &MetricName) -> Result<(), CoreError> {
        if !self.limit_value.is_finite() {
            return Err(CoreError::InvalidLimit {
                metric: metric.to_string(),
                reason: "limit_value must be a finite number".into(),
            });
        }
        if let Some(bad) = self
            .webhook_urls
            .iter()
            .find(|u| !(u.starts_with("http://") || u.starts_with("https://")))
        {
            return Err(CoreError::InvalidLimit {
                metric: metric.to_string(),
                reason: format!("webhook url must be http or https: {bad}"),
            });
        }
        Ok(())
    }

    /// Evaluate this limit against `current`.
    #[must_use]
    pub fn evaluate(&self, current: f64) -> BreachEvaluation {
        evaluate_breach(current, self.limit_value, self.limit_operator)
    }
}

/// A limit defined on a plan, keyed by metric name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanLimit {
    pub metric_name: MetricName,
    pub limit_value: f64,
    #[serde(default)]
    pub breach_operator: LimitOperator,
    #[serde(default)]
    pub breach_action: BreachAction,
    #[serde(default)]
    pub webhook_urls: Vec<String>,
    /// Restricts the limit to units of one metric type.
    #[serde(default)]
    pub metric_type: Option<MetricType>,
}

impl PlanLimit {
    /// The per-unit limit this plan entry implies.
    #[must_use]
    pub fn to_limit_config(&self) -> LimitConfig {
        LimitConfig {
            limit_value: self.limit_value,
            limit_operator: self.breach_operator,
            breach_action: self.breach_action,
            webhook_urls: self.webhook_urls.clone(),
        }
    }

    /// Whether this entry applies to a unit of `metric_type`.
    #[must_use]
    pub fn applies_to(&self, metric_type: MetricType) -> bool {
        self.metric_type.is_none_or(|t| t == metric_type)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.metric_name.is_blank() {
            return Err(CoreError::InvalidMetricName(
                "plan limit metric_name must not be empty".into(),
            ));
        }
        self.to_limit_config().validate(&self.metric_name)
    }
}

/// Find the plan limit for `metric_name` that applies to `metric_type`.
pub fn find_plan_limit<'a>(
    limits: &'a [PlanLimit],
    metric_name: &MetricName,
    metric_type: MetricType,
) -> Option<&'a PlanLimit> {
    limits
        .iter()
        .find(|l| &l.metric_name == metric_name && l.applies_to(metric_type))
}

/// Result of comparing usage against a limit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreachEvaluation {
    pub is_breached: bool,
    /// Headroom before the limit; only defined for upper-bound operators.
    pub remaining: Option<f64>,
}

/// The single breach truth table used by every unit and the gateway.
///
/// `remaining` is `max(0, limit - current)` for `gt`/`gte` and `None` for the
/// lower-bound and equality operators.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn evaluate_breach(current: f64, limit: f64, operator: LimitOperator) -> BreachEvaluation {
    let is_breached = match operator {
        LimitOperator::Gt => current > limit,
        LimitOperator::Gte => current >= limit,
        LimitOperator::Lt => current < limit,
        LimitOperator::Lte => current <= limit,
        LimitOperator::Eq => current == limit,
    };
    let remaining = match operator {
        LimitOperator::Gt | LimitOperator::Gte => Some((limit - current).max(0.0)),
        LimitOperator::Lt | LimitOperator::Lte | LimitOperator::Eq => None,
    };
    BreachEvaluation {
        is_breached,
        remaining,
    }
}

/// Point-in-time limit status of one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreachStatus {
    pub metric_name: MetricName,
    pub current_usage: f64,
    /// `None` when the metric has no limit.
    pub limit_value: Option<f64>,
    pub limit_operator: Option<LimitOperator>,
    pub breach_action: Option<BreachAction>,
    pub is_breached: bool,
    pub remaining: Option<f64>,
    /// Seconds until the next reset, for `Reset` metrics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resets_in_seconds: Option<u64>,
}

impl BreachStatus {
    /// Build a status for `current` against an optional limit.
    ///
    /// A metric without a limit is never breached.
    pub fn evaluate(metric_name: MetricName, current: f64, limit: Option<&LimitConfig>) -> Self {
        match limit {
            None => Self {
                metric_name,
                current_usage: current,
                limit_value: None,
                limit_operator: None,
                breach_action: None,
                is_breached: false,
                remaining: None,
                resets_in_seconds: None,
            },
            Some(limit) => {
                let eval = limit.evaluate(current);
                Self {
                    metric_name,
                    current_usage: current,
                    limit_value: Some(limit.limit_value),
                    limit_operator: Some(limit.limit_operator),
                    breach_action: Some(limit.breach_action),
                    is_breached: eval.is_breached,
                    remaining: eval.remaining,
                    resets_in_seconds: None,
                }
            }
        }
    }

    #[must_use]
    pub fn with_resets_in(mut self, seconds: Option<u64>) -> Self {
        self.resets_in_seconds = seconds;
        self
    }

    /// Breached with a `deny` action: admission must be refused.
    #[must_use]
    pub fn denies(&self) -> bool {
        self.is_breached && self.breach_action == Some(BreachAction::Deny)
    }
}
