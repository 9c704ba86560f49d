pub mod customer;
pub mod error;
pub mod limit;
pub mod metric;
pub mod scope;
pub mod types;
pub mod usage;

pub use customer::{Business, Customer, CustomerContext, Machine};
pub use error::CoreError;
pub use limit::{
    BreachAction, BreachEvaluation, BreachStatus, LimitConfig, LimitOperator, PlanLimit,
    evaluate_breach, find_plan_limit,
};
pub use metric::{
    CLEANUP_NEVER, DEFAULT_CLEANUP_SECONDS, MetricOperation, MetricSpec, MetricType, TickType,
    cleanup_after_seconds, coerce_tick_type,
};
pub use scope::{BUSINESS_SCOPE, CUSTOMER_SCOPE, MetricScope, ScopeError, resolve_scope};
pub use types::{BusinessId, Credential, CustomerId, MetricName, PlanId};
pub use usage::{BreachEvent, UsageSnapshot};
