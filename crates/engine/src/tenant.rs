//! Business and customer coordinators.
//!
//! A coordinator owns the metric units of one tenant scope. It is the only
//! place a unit is spawned: on `EnsureMetric` it loads the tenant's plan
//! limits, builds the unit, and registers it in the metric directory.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

use tracktags_core::{
    Credential, CustomerContext, MetricName, MetricScope, MetricSpec, MetricType, PlanLimit,
    find_plan_limit,
};

use crate::ask::ask;
use crate::directory::{Directory, DirectoryEntry};
use crate::error::EngineError;
use crate::metrics::EngineMetrics;
use crate::registry::EngineContext;
use crate::unit::{MetricHandle, spawn_unit};

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

pub enum TenantMessage {
    EnsureMetric {
        spec: MetricSpec,
        created_by: Option<Credential>,
        reply: Reply<MetricHandle>,
    },
    GetMetricActor {
        metric_name: MetricName,
        reply: oneshot::Sender<Option<MetricHandle>>,
    },
    /// Push changed limits to running units. `None` reloads from the store.
    PlanLimitsChanged {
        limits: Option<Vec<PlanLimit>>,
        reply: Reply<usize>,
    },
    ResetStripeMetrics {
        reply: oneshot::Sender<usize>,
    },
    /// Replace the held customer context (customers only).
    UpdateContext {
        context: CustomerContext,
    },
    GetContext {
        reply: oneshot::Sender<Option<CustomerContext>>,
    },
    Shutdown,
}

/// Mailbox reference to a business or customer coordinator.
#[derive(Debug, Clone)]
pub struct TenantHandle {
    scope: Arc<MetricScope>,
    key: Arc<str>,
    instance_id: u64,
    tx: mpsc::UnboundedSender<TenantMessage>,
}

impl DirectoryEntry for TenantHandle {
    fn instance_id(&self) -> u64 {
        self.instance_id
    }

    fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl TenantHandle {
    /// The scope of every metric this coordinator owns.
    pub fn scope(&self) -> &MetricScope {
        &self.scope
    }

    pub async fn ensure_metric(
        &self,
        spec: MetricSpec,
        created_by: Option<Credential>,
        after: Duration,
    ) -> Result<MetricHandle, EngineError> {
        ask(&self.tx, &self.key, "ensure_metric", after, |reply| {
            TenantMessage::EnsureMetric {
                spec,
                created_by,
                reply,
            }
        })
        .await?
    }

    pub async fn metric_actor(
        &self,
        metric_name: MetricName,
        after: Duration,
    ) -> Result<Option<MetricHandle>, EngineError> {
        ask(&self.tx, &self.key, "get_metric_actor", after, |reply| {
            TenantMessage::GetMetricActor { metric_name, reply }
        })
        .await
    }

    pub async fn plan_limits_changed(
        &self,
        limits: Option<Vec<PlanLimit>>,
        after: Duration,
    ) -> Result<usize, EngineError> {
        ask(&self.tx, &self.key, "plan_limits_changed", after, |reply| {
            TenantMessage::PlanLimitsChanged { limits, reply }
        })
        .await?
    }

    pub async fn reset_stripe_metrics(&self, after: Duration) -> Result<usize, EngineError> {
        ask(&self.tx, &self.key, "reset_stripe_metrics", after, |reply| {
            TenantMessage::ResetStripeMetrics { reply }
        })
        .await
    }

    pub fn update_context(&self, context: CustomerContext) -> Result<(), EngineError> {
        self.tx
            .send(TenantMessage::UpdateContext { context })
            .map_err(|_| EngineError::Stopped(self.key.to_string()))
    }

    pub async fn context(&self, after: Duration) -> Result<Option<CustomerContext>, EngineError> {
        ask(&self.tx, &self.key, "get_context", after, |reply| {
            TenantMessage::GetContext { reply }
        })
        .await
    }

    pub fn shutdown(&self) -> Result<(), EngineError> {
        self.tx
            .send(TenantMessage::Shutdown)
            .map_err(|_| EngineError::Stopped(self.key.to_string()))
    }
}

struct TenantCoordinator {
    scope: MetricScope,
    key: Arc<str>,
    instance_id: u64,
    /// Held customer context; always `None` for businesses.
    context: Option<CustomerContext>,
    units: HashMap<MetricName, MetricHandle>,
    ctx: Arc<EngineContext>,
}

/// Start a coordinator for `scope`. Only the root coordinator calls this.
pub(crate) fn spawn_tenant(
    ctx: &Arc<EngineContext>,
    scope: MetricScope,
    context: Option<CustomerContext>,
) -> TenantHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let key: Arc<str> = scope.lookup_key().into();
    let instance_id = ctx.next_instance_id();
    let scope = Arc::new(scope);
    let coordinator = TenantCoordinator {
        scope: (*scope).clone(),
        key: Arc::clone(&key),
        instance_id,
        context,
        units: HashMap::new(),
        ctx: Arc::clone(ctx),
    };
    EngineMetrics::bump(&ctx.metrics.coordinators_spawned);
    ctx.tracker.spawn(coordinator.run(rx));
    TenantHandle {
        scope,
        key,
        instance_id,
        tx,
    }
}

impl TenantCoordinator {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<TenantMessage>) {
        debug!(tenant = %self.scope, "coordinator started");
        while let Some(message) = rx.recv().await {
            match message {
                TenantMessage::EnsureMetric {
                    spec,
                    created_by,
                    reply,
                } => {
                    let result = self.ensure_metric(spec, created_by).await;
                    let _ = reply.send(result);
                }
                TenantMessage::GetMetricActor { metric_name, reply } => {
                    let _ = reply.send(self.live_unit(&metric_name));
                }
                TenantMessage::PlanLimitsChanged { limits, reply } => {
                    let result = self.apply_plan_change(limits).await;
                    let _ = reply.send(result);
                }
                TenantMessage::ResetStripeMetrics { reply } => {
                    let _ = reply.send(self.reset_stripe());
                }
                TenantMessage::UpdateContext { context } => {
                    if self.context.is_some() {
                        self.context = Some(context);
                    } else {
                        warn!(
                            tenant = %self.scope,
                            "ignoring customer context sent to a business coordinator"
                        );
                    }
                }
                TenantMessage::GetContext { reply } => {
                    let _ = reply.send(self.context.clone());
                }
                TenantMessage::Shutdown => break,
            }
        }
        rx.close();
        drop(rx);
        for unit in self.units.values() {
            let _ = unit.shutdown();
        }
        self.tenants().deregister(&self.key, self.instance_id);
        info!(tenant = %self.scope, units = self.units.len(), "coordinator stopped");
    }

    fn tenants(&self) -> &Directory<TenantHandle> {
        self.ctx.registry.tenants_for(&self.scope)
    }

    fn live_unit(&mut self, metric_name: &MetricName) -> Option<MetricHandle> {
        self.units.retain(|_, h| h.is_alive());
        self.units.get(metric_name).cloned()
    }

    #[instrument(
        name = "engine.ensure_metric",
        skip_all,
        fields(tenant = %self.scope, metric = %spec.metric_name)
    )]
    async fn ensure_metric(
        &mut self,
        spec: MetricSpec,
        created_by: Option<Credential>,
    ) -> Result<MetricHandle, EngineError> {
        let key = self.scope.metric_key(&spec.metric_name);
        if let Some(existing) = self.ctx.registry.metrics.lookup(&key) {
            self.units.insert(spec.metric_name.clone(), existing.clone());
            return Ok(existing);
        }

        spec.validate()?;
        let spec = spec.normalized();
        let plan_limits = self.current_plan_limits().await?;
        let limit = match find_plan_limit(&plan_limits, &spec.metric_name, spec.metric_type) {
            Some(plan) => {
                plan.validate()?;
                Some(plan.to_limit_config())
            }
            None => spec.limit.clone(),
        };

        let metric_name = spec.metric_name.clone();
        let ctx = Arc::clone(&self.ctx);
        let scope = self.scope.clone();
        let (handle, created) = self
            .ctx
            .registry
            .metrics
            .get_or_register_with(&key, || {
                spawn_unit(&ctx, key.clone(), scope, spec, limit, created_by)
            });
        if created {
            info!(%key, "metric unit created");
        }
        self.units.insert(metric_name, handle.clone());
        Ok(handle)
    }

    async fn current_plan_limits(&self) -> Result<Vec<PlanLimit>, EngineError> {
        match &self.context {
            Some(context) => Ok(context.plan_limits.clone()),
            None => Ok(self
                .ctx
                .store
                .business_plan_limits(self.scope.business_id())
                .await?),
        }
    }

    async fn reload_plan_limits(&mut self) -> Result<Vec<PlanLimit>, EngineError> {
        match &self.scope {
            MetricScope::Business { business_id } => {
                Ok(self.ctx.store.business_plan_limits(business_id).await?)
            }
            MetricScope::Customer {
                business_id,
                customer_id,
            } => {
                let context = self
                    .ctx
                    .store
                    .customer_context(business_id, customer_id)
                    .await?
                    .ok_or_else(|| EngineError::NotFound(format!("customer {customer_id}")))?;
                let limits = context.plan_limits.clone();
                self.context = Some(context);
                Ok(limits)
            }
        }
    }

    async fn apply_plan_change(
        &mut self,
        limits: Option<Vec<PlanLimit>>,
    ) -> Result<usize, EngineError> {
        let limits = match limits {
            Some(limits) => {
                if let Some(context) = &mut self.context {
                    context.plan_limits.clone_from(&limits);
                }
                limits
            }
            None => self.reload_plan_limits().await?,
        };
        for limit in &limits {
            limit.validate()?;
        }

        self.units.retain(|_, h| h.is_alive());
        let mut updated = 0;
        for (metric_name, unit) in &self.units {
            if let Some(plan) = find_plan_limit(&limits, metric_name, unit.metric_type())
                && unit.change_limit(Some(plan.to_limit_config())).is_ok()
            {
                updated += 1;
            }
        }
        info!(tenant = %self.scope, updated, "plan limits changed");
        Ok(updated)
    }

    fn reset_stripe(&mut self) -> usize {
        self.units.retain(|_, h| h.is_alive());
        self.units
            .values()
            .filter(|u| u.metric_type() == MetricType::StripeBilling)
            .filter(|u| u.reset_stripe().is_ok())
            .count()
    }
}
