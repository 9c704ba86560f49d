//! Tenant scoping for metrics.
//!
//! A metric always belongs to a [`MetricScope`]: either a business as a whole
//! or one customer of that business. The scope determines the directory key
//! under which the metric's tracking unit is registered, so key derivation
//! must be stable and collision-free across both variants.

use std::fmt;

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{BusinessId, CustomerId, MetricName};

/// Characters escaped inside a key component. `:` is the component separator.
const KEY_COMPONENT: &AsciiSet = &CONTROLS.add(b':').add(b'%');

/// Scope tag accepted for business-wide metrics.
pub const BUSINESS_SCOPE: &str = "business";
/// Scope tag accepted for per-customer metrics.
pub const CUSTOMER_SCOPE: &str = "customer";

/// The tenant addressing dimension of a metric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum MetricScope {
    /// Metric shared by the whole business.
    Business {
        /// Owning business.
        business_id: BusinessId,
    },
    /// Metric tracked for one customer of a business.
    Customer {
        /// Owning business.
        business_id: BusinessId,
        /// The customer within that business.
        customer_id: CustomerId,
    },
}

/// A scope could not be resolved from the caller's input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("unknown scope '{0}': expected 'business' or 'customer'")]
    UnknownScope(String),

    #[error("customer scope requires a customer_id")]
    MissingCustomerId,

    #[error("business_id must not be empty")]
    MissingBusinessId,
}

/// Resolve a [`MetricScope`] from a scope tag and tenant identifiers.
///
/// `"business"` ignores any customer id. `"customer"` requires a non-blank
/// customer id. Any other tag is rejected.
pub fn resolve_scope(
    scope_tag: &str,
    business_id: &BusinessId,
    customer_id: Option<&CustomerId>,
) -> Result<MetricScope, ScopeError> {
    if business_id.is_blank() {
        return Err(ScopeError::MissingBusinessId);
    }
    match scope_tag {
        BUSINESS_SCOPE => Ok(MetricScope::Business {
            business_id: business_id.clone(),
        }),
        CUSTOMER_SCOPE => match customer_id {
            Some(customer_id) if !customer_id.is_blank() => Ok(MetricScope::Customer {
                business_id: business_id.clone(),
                customer_id: customer_id.clone(),
            }),
            _ => Err(ScopeError::MissingCustomerId),
        },
        other => Err(ScopeError::UnknownScope(other.to_owned())),
    }
}

impl MetricScope {
    /// Shorthand for a business scope.
    pub fn business(business_id: impl Into<BusinessId>) -> Self {
        Self::Business {
            business_id: business_id.into(),
        }
    }

    /// Shorthand for a customer scope.
    pub fn customer(
        business_id: impl Into<BusinessId>,
        customer_id: impl Into<CustomerId>,
    ) -> Self {
        Self::Customer {
            business_id: business_id.into(),
            customer_id: customer_id.into(),
        }
    }

    /// The business that owns this scope.
    #[must_use]
    pub fn business_id(&self) -> &BusinessId {
        match self {
            Self::Business { business_id } | Self::Customer { business_id, .. } => business_id,
        }
    }

    /// The customer, for customer scopes.
    #[must_use]
    pub fn customer_id(&self) -> Option<&CustomerId> {
        match self {
            Self::Business { .. } => None,
            Self::Customer { customer_id, .. } => Some(customer_id),
        }
    }

    /// The scope tag (`"business"` or `"customer"`).
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Business { .. } => BUSINESS_SCOPE,
            Self::Customer { .. } => CUSTOMER_SCOPE,
        }
    }

    /// Directory key of the tenant this scope addresses.
    ///
    /// Format: `business:{business_id}` or
    /// `customer:{business_id}:{customer_id}`, each component percent-escaped
    /// so that ids containing `:` cannot collide.
    #[must_use]
    pub fn lookup_key(&self) -> String {
        match self {
            Self::Business { business_id } => {
                format!("{BUSINESS_SCOPE}:{}", escape(business_id))
            }
            Self::Customer {
                business_id,
                customer_id,
            } => format!(
                "{CUSTOMER_SCOPE}:{}:{}",
                escape(business_id),
                escape(customer_id)
            ),
        }
    }

    /// Directory key of one metric within this scope.
    #[must_use]
    pub fn metric_key(&self, metric_name: &MetricName) -> String {
        format!("{}:{}", self.lookup_key(), escape(metric_name))
    }
}

impl fmt::Display for MetricScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Business { business_id } => write!(f, "business/{business_id}"),
            Self::Customer {
                business_id,
                customer_id,
            } => write!(f, "customer/{business_id}/{customer_id}"),
        }
    }
}

fn escape(component: &str) -> String {
    utf8_percent_encode(component, KEY_COMPONENT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn biz() -> BusinessId {
        BusinessId::new("biz_1")
    }

    #[test]
    fn business_tag_resolves_and_ignores_customer() {
        let c = CustomerId::new("cust_9");
        assert_eq!(
            resolve_scope("business", &biz(), Some(&c)).unwrap(),
            MetricScope::business("biz_1")
        );
        assert_eq!(
            resolve_scope("business", &biz(), None).unwrap(),
            MetricScope::business("biz_1")
        );
    }

    #[test]
    fn customer_tag_requires_customer_id() {
        let c = CustomerId::new("cust_9");
        assert_eq!(
            resolve_scope("customer", &biz(), Some(&c)).unwrap(),
            MetricScope::customer("biz_1", "cust_9")
        );
        assert_eq!(
            resolve_scope("customer", &biz(), None),
            Err(ScopeError::MissingCustomerId)
        );
        assert_eq!(
            resolve_scope("customer", &biz(), Some(&CustomerId::new(""))),
            Err(ScopeError::MissingCustomerId)
        );
    }

    #[test]
    fn other_tags_are_rejected() {
        assert_eq!(
            resolve_scope("global", &biz(), None),
            Err(ScopeError::UnknownScope("global".into()))
        );
        assert_eq!(
            resolve_scope("Business", &biz(), None),
            Err(ScopeError::UnknownScope("Business".into()))
        );
    }

    #[test]
    fn blank_business_is_rejected() {
        assert_eq!(
            resolve_scope("business", &BusinessId::new(""), None),
            Err(ScopeError::MissingBusinessId)
        );
    }

    #[test]
    fn lookup_keys_are_distinct_per_scope() {
        let b = MetricScope::business("acme");
        let c = MetricScope::customer("acme", "c1");
        assert_eq!(b.lookup_key(), "business:acme");
        assert_eq!(c.lookup_key(), "customer:acme:c1");
        assert_ne!(
            b.metric_key(&MetricName::new("api_calls")),
            c.metric_key(&MetricName::new("api_calls"))
        );
    }

    #[test]
    fn separators_inside_ids_cannot_collide() {
        // Without escaping both would render as "customer:a:b:c:m".
        let left = MetricScope::customer("a:b", "c").metric_key(&MetricName::new("m"));
        let right = MetricScope::customer("a", "b:c").metric_key(&MetricName::new("m"));
        assert_ne!(left, right);

        let metric_left = MetricScope::business("a").metric_key(&MetricName::new("b:c"));
        let metric_right = MetricScope::business("a:b").metric_key(&MetricName::new("c"));
        assert_ne!(metric_left, metric_right);
    }

    #[test]
    fn lookup_key_is_stable() {
        let scope = MetricScope::customer("acme", "c1");
        assert_eq!(scope.lookup_key(), scope.clone().lookup_key());
        assert_eq!(scope.business_id().as_str(), "acme");
        assert_eq!(scope.customer_id().map(CustomerId::as_str), Some("c1"));
        assert_eq!(scope.tag(), "customer");
    }
}
