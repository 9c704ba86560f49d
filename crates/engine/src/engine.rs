use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tracktags_core::{
    BreachStatus, BusinessId, Credential, CustomerContext, CustomerId, LimitConfig, MetricName,
    MetricScope, MetricSpec, PlanLimit, TickType,
};
use tracktags_store::PlanStore;

use crate::error::EngineError;
use crate::metrics::EngineMetrics;
use crate::notify::{BreachNotifier, UsageSink};
use crate::registry::{EngineContext, MetricDirectoryReader, Registry};
use crate::root::{RootHandle, spawn_root};
use crate::scheduler::{broadcast_tick, spawn_tick_loops};
use crate::tenant::TenantHandle;
use crate::unit::{MetricHandle, MetricSnapshot};

/// Runtime settings for an [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline for every bounded request/reply.
    pub ask_timeout: Duration,
    /// Start the per-interval tick loops. Tests drive ticks by hand instead.
    pub enable_ticks: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ask_timeout: Duration::from_secs(1),
            enable_ticks: true,
        }
    }
}

/// Fluent builder for an [`Engine`]. A [`PlanStore`] is required.
#[derive(Default)]
pub struct EngineBuilder {
    store: Option<Arc<dyn PlanStore>>,
    notifier: Option<Arc<dyn BreachNotifier>>,
    usage_sink: Option<Arc<dyn UsageSink>>,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn PlanStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn breach_notifier(mut self, notifier: Arc<dyn BreachNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    #[must_use]
    pub fn usage_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.usage_sink = Some(sink);
        self
    }

    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Start the root coordinator (and tick loops, if enabled).
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Result<Engine, EngineError> {
        let store = self
            .store
            .ok_or_else(|| EngineError::Configuration("plan store is required".into()))?;
        if self.config.ask_timeout.is_zero() {
            return Err(EngineError::Configuration(
                "ask_timeout must be greater than zero".into(),
            ));
        }
        let ctx = Arc::new(EngineContext::new(
            store,
            self.notifier,
            self.usage_sink,
            self.config.ask_timeout,
        ));
        let root = spawn_root(&ctx);
        let ticks = CancellationToken::new();
        if self.config.enable_ticks {
            spawn_tick_loops(&ctx, &ticks);
        }
        info!(ask_timeout = ?self.config.ask_timeout, "engine started");
        Ok(Engine { ctx, root, ticks })
    }
}

/// Entry point to the metering core.
///
/// Creation paths go through the root coordinator; reads and records go
/// straight to the unit found in the directory.
#[derive(Clone)]
pub struct Engine {
    ctx: Arc<EngineContext>,
    root: RootHandle,
    ticks: CancellationToken,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn registry(&self) -> &Registry {
        &self.ctx.registry
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.ctx.metrics
    }

    pub fn ask_timeout(&self) -> Duration {
        self.ctx.ask_timeout
    }

    /// Lookup-only access to the metric directory.
    pub fn directory_reader(&self) -> MetricDirectoryReader {
        MetricDirectoryReader::new(Arc::clone(&self.ctx.registry.metrics), self.ctx.ask_timeout)
    }

    fn observe<T>(&self, result: Result<T, EngineError>) -> Result<T, EngineError> {
        if let Err(e) = &result
            && e.is_timeout()
        {
            EngineMetrics::bump(&self.ctx.metrics.ask_timeouts);
            warn!(error = %e, "engine request timed out");
        }
        result
    }

    pub async fn ensure_business(
        &self,
        business_id: BusinessId,
        credential: Option<Credential>,
    ) -> Result<TenantHandle, EngineError> {
        let result = self
            .root
            .ensure_business(business_id, credential, self.ctx.ask_timeout)
            .await;
        self.observe(result)
    }

    pub async fn ensure_customer(
        &self,
        business_id: BusinessId,
        customer_id: CustomerId,
        context: Option<CustomerContext>,
        credential: Option<Credential>,
    ) -> Result<TenantHandle, EngineError> {
        let result = self
            .root
            .ensure_customer(
                business_id,
                customer_id,
                context,
                credential,
                self.ctx.ask_timeout,
            )
            .await;
        self.observe(result)
    }

    async fn ensure_tenant(
        &self,
        scope: &MetricScope,
        credential: Option<Credential>,
    ) -> Result<TenantHandle, EngineError> {
        match scope {
            MetricScope::Business { business_id } => {
                self.ensure_business(business_id.clone(), credential).await
            }
            MetricScope::Customer {
                business_id,
                customer_id,
            } => {
                self.ensure_customer(business_id.clone(), customer_id.clone(), None, credential)
                    .await
            }
        }
    }

    /// Create the unit for `spec` in `scope` unless it is already running.
    ///
    /// This is the provisioning path: the tenant coordinator is ensured
    /// first, then asked to ensure the unit.
    pub async fn ensure_metric(
        &self,
        scope: &MetricScope,
        spec: MetricSpec,
        credential: Option<Credential>,
    ) -> Result<MetricHandle, EngineError> {
        let tenant = self.ensure_tenant(scope, credential.clone()).await?;
        let result = tenant
            .ensure_metric(spec, credential, self.ctx.ask_timeout)
            .await;
        self.observe(result)
    }

    /// The running unit for a metric, straight from the directory.
    pub fn lookup_metric(
        &self,
        scope: &MetricScope,
        metric_name: &MetricName,
    ) -> Option<MetricHandle> {
        self.ctx
            .registry
            .metrics
            .lookup(&scope.metric_key(metric_name))
    }

    fn require_metric(
        &self,
        scope: &MetricScope,
        metric_name: &MetricName,
    ) -> Result<MetricHandle, EngineError> {
        self.lookup_metric(scope, metric_name).ok_or_else(|| {
            EngineError::NotFound(format!("metric {metric_name} in {scope}"))
        })
    }

    /// Ask the owning coordinator for a metric's unit. `None` when the
    /// coordinator is not running or owns no such unit.
    pub async fn metric_actor(
        &self,
        scope: &MetricScope,
        metric_name: &MetricName,
    ) -> Result<Option<MetricHandle>, EngineError> {
        let Some(tenant) = self
            .ctx
            .registry
            .tenants_for(scope)
            .lookup(&scope.lookup_key())
        else {
            return Ok(None);
        };
        let result = tenant
            .metric_actor(metric_name.clone(), self.ctx.ask_timeout)
            .await;
        self.observe(result)
    }

    /// Fire-and-forget record into an existing unit.
    pub fn record(
        &self,
        scope: &MetricScope,
        metric_name: &MetricName,
        value: f64,
        tags: HashMap<String, String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), EngineError> {
        self.require_metric(scope, metric_name)?
            .record(value, tags, metadata)
    }

    pub async fn limit_status(
        &self,
        scope: &MetricScope,
        metric_name: &MetricName,
        limit_override: Option<LimitConfig>,
    ) -> Result<BreachStatus, EngineError> {
        let unit = self.require_metric(scope, metric_name)?;
        let result = unit
            .limit_status(limit_override, self.ctx.ask_timeout)
            .await;
        self.observe(result)
    }

    pub async fn snapshot(
        &self,
        scope: &MetricScope,
        metric_name: &MetricName,
    ) -> Result<MetricSnapshot, EngineError> {
        let unit = self.require_metric(scope, metric_name)?;
        let result = unit.snapshot(self.ctx.ask_timeout).await;
        self.observe(result)
    }

    /// Push a durable plan change to the running units of one tenant.
    ///
    /// `limits = None` makes the coordinator reload them from the store.
    /// Returns the number of units updated; zero when the tenant has no
    /// running coordinator.
    pub async fn notify_plan_change(
        &self,
        business_id: &BusinessId,
        customer_id: Option<&CustomerId>,
        limits: Option<Vec<PlanLimit>>,
    ) -> Result<usize, EngineError> {
        let scope = match customer_id {
            Some(customer_id) => MetricScope::customer(business_id.clone(), customer_id.clone()),
            None => MetricScope::business(business_id.clone()),
        };
        let Some(tenant) = self
            .ctx
            .registry
            .tenants_for(&scope)
            .lookup(&scope.lookup_key())
        else {
            return Ok(0);
        };
        let result = tenant
            .plan_limits_changed(limits, self.ctx.ask_timeout)
            .await;
        self.observe(result)
    }

    /// Billing cycle boundary: zero every `StripeBilling` unit of a business
    /// and of all its running customers.
    pub async fn reset_stripe_metrics(
        &self,
        business_id: &BusinessId,
    ) -> Result<usize, EngineError> {
        let registry = &self.ctx.registry;
        let tenants = registry
            .businesses
            .handles()
            .into_iter()
            .chain(registry.customers.handles())
            .filter(|t| t.scope().business_id() == business_id);
        let mut reset = 0;
        for tenant in tenants {
            let result = tenant.reset_stripe_metrics(self.ctx.ask_timeout).await;
            reset += self.observe(result)?;
        }
        info!(%business_id, reset, "stripe billing metrics reset");
        Ok(reset)
    }

    /// Stop a unit. Returns `false` if it was not running.
    pub fn shutdown_metric(&self, scope: &MetricScope, metric_name: &MetricName) -> bool {
        self.lookup_metric(scope, metric_name)
            .is_some_and(|unit| unit.shutdown().is_ok())
    }

    /// Deliver one tick to every unit now. The tick loops call the same
    /// path on their schedule.
    pub fn tick(&self, tick_type: TickType) -> usize {
        broadcast_tick(&self.ctx.registry, tick_type, Utc::now())
    }

    /// Stop the tick loops and every coordinator and unit, then wait up to
    /// `grace` for in-flight flushes and notifications.
    pub async fn shutdown(&self, grace: Duration) {
        self.ticks.cancel();
        if let Err(e) = self.root.shutdown(self.ctx.ask_timeout).await {
            warn!(error = %e, "root coordinator did not acknowledge shutdown");
        }
        self.ctx.tracker.close();
        if tokio::time::timeout(grace, self.ctx.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                pending = self.ctx.tracker.len(),
                "engine shutdown grace period elapsed"
            );
        } else {
            info!("engine stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use tracktags_core::{
        BreachAction, BreachEvent, Business, Customer, LimitOperator, MetricOperation,
        MetricType, UsageSnapshot,
    };
    use tracktags_store::StoreError;
    use tracktags_store_memory::MemoryPlanStore;

    use super::*;
    use crate::error::NotifyError;

    const BIZ: &str = "acme";

    fn plan_limit(name: &str, value: f64, action: BreachAction) -> PlanLimit {
        PlanLimit {
            metric_name: MetricName::new(name),
            limit_value: value,
            breach_operator: LimitOperator::Gte,
            breach_action: action,
            webhook_urls: vec!["https://hooks.example.com/a".into()],
            metric_type: None,
        }
    }

    fn seeded_store() -> Arc<MemoryPlanStore> {
        let store = MemoryPlanStore::new();
        store.put_business(Business::new(BIZ));
        let mut ctx = CustomerContext::new(Customer::new(BIZ, "c1"));
        ctx.plan_limits.push(plan_limit("seats", 3.0, BreachAction::Deny));
        store.put_customer(ctx);
        Arc::new(store)
    }

    fn engine_with(store: Arc<MemoryPlanStore>) -> Engine {
        Engine::builder()
            .store(store)
            .config(EngineConfig {
                ask_timeout: Duration::from_secs(1),
                enable_ticks: false,
            })
            .build()
            .unwrap()
    }

    fn engine() -> Engine {
        engine_with(seeded_store())
    }

    fn biz() -> MetricScope {
        MetricScope::business(BIZ)
    }

    fn spec(name: &str, limit: Option<LimitConfig>) -> MetricSpec {
        let mut spec = MetricSpec::new(name);
        spec.metric_type = MetricType::Checkpoint;
        spec.limit = limit;
        spec
    }

    fn deny_at(value: f64) -> LimitConfig {
        LimitConfig::new(value, LimitOperator::Gte, BreachAction::Deny)
    }

    #[derive(Default)]
    struct Collector {
        events: Mutex<Vec<BreachEvent>>,
        snapshots: Mutex<Vec<UsageSnapshot>>,
    }

    #[async_trait]
    impl BreachNotifier for Collector {
        async fn notify(&self, event: &BreachEvent) -> Result<(), NotifyError> {
            self.events.lock().push(event.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl UsageSink for Collector {
        async fn flush(&self, snapshot: &UsageSnapshot) -> Result<(), StoreError> {
            self.snapshots.lock().push(snapshot.clone());
            Ok(())
        }
    }

    async fn settle(cond: impl Fn() -> bool) {
        for _ in 0..100 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn builder_requires_store() {
        assert!(matches!(
            Engine::builder().build(),
            Err(EngineError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn below_limit_reports_remaining() {
        let engine = engine();
        let mut s = spec("api_calls", Some(deny_at(1000.0)));
        s.initial_value = 950.0;
        engine.ensure_metric(&biz(), s, None).await.unwrap();

        let status = engine
            .limit_status(&biz(), &MetricName::new("api_calls"), None)
            .await
            .unwrap();
        assert!(!status.is_breached);
        assert_eq!(status.remaining, Some(50.0));
        assert!((status.current_usage - 950.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn records_push_usage_past_the_limit() {
        let engine = engine();
        let mut s = spec("api_calls", Some(deny_at(1000.0)));
        s.initial_value = 950.0;
        engine.ensure_metric(&biz(), s, None).await.unwrap();
        let name = MetricName::new("api_calls");
        for _ in 0..3 {
            engine
                .record(&biz(), &name, 20.0, HashMap::new(), None)
                .unwrap();
        }
        let status = engine.limit_status(&biz(), &name, None).await.unwrap();
        assert!(status.is_breached);
        assert!(status.denies());
        assert!((status.current_usage - 1010.0).abs() < f64::EPSILON);
        assert_eq!(status.remaining, Some(0.0));
    }

    #[tokio::test]
    async fn ensure_is_idempotent() {
        let engine = engine();
        let first = engine
            .ensure_metric(&biz(), spec("m", None), None)
            .await
            .unwrap();
        engine
            .record(&biz(), &MetricName::new("m"), 5.0, HashMap::new(), None)
            .unwrap();
        let mut changed = spec("m", Some(deny_at(1.0)));
        changed.initial_value = 100.0;
        let second = engine.ensure_metric(&biz(), changed, None).await.unwrap();
        assert_eq!(first.key(), second.key());

        let snap = engine.snapshot(&biz(), &MetricName::new("m")).await.unwrap();
        assert!((snap.current_value - 5.0).abs() < f64::EPSILON);
        assert!(snap.limit.is_none());
        assert_eq!(engine.metrics().snapshot().units_spawned, 1);
    }

    #[tokio::test]
    async fn concurrent_ensures_spawn_one_unit() {
        let engine = engine();
        let calls: Vec<_> = (0..16)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine
                        .ensure_metric(&biz(), spec("shared", None), None)
                        .await
                        .map(|h| h.key().to_owned())
                })
            })
            .collect();
        for call in calls {
            call.await.unwrap().unwrap();
        }
        assert_eq!(engine.metrics().snapshot().units_spawned, 1);
        assert_eq!(engine.registry().metric_count(), 1);
    }

    #[tokio::test]
    async fn unknown_business_is_not_found() {
        let engine = engine();
        let err = engine
            .ensure_metric(&MetricScope::business("ghost"), spec("m", None), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
        assert_eq!(engine.registry().tenant_count(), 0);
    }

    #[tokio::test]
    async fn unknown_customer_is_not_found() {
        let engine = engine();
        let err = engine
            .ensure_metric(&MetricScope::customer(BIZ, "nobody"), spec("m", None), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn invalid_spec_is_rejected_before_spawn() {
        let engine = engine();
        let err = engine
            .ensure_metric(&biz(), spec("bad", Some(deny_at(f64::NAN))), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Invalid(_)));
        assert_eq!(engine.registry().metric_count(), 0);
    }

    #[tokio::test]
    async fn plan_limit_wins_over_requested_limit() {
        let store = seeded_store();
        store.set_plan_limits(
            &BusinessId::new(BIZ),
            vec![plan_limit("api_calls", 10.0, BreachAction::Deny)],
        );
        let engine = engine_with(store);
        engine
            .ensure_metric(&biz(), spec("api_calls", Some(deny_at(500.0))), None)
            .await
            .unwrap();
        let status = engine
            .limit_status(&biz(), &MetricName::new("api_calls"), None)
            .await
            .unwrap();
        assert_eq!(status.limit_value, Some(10.0));
    }

    #[tokio::test]
    async fn customer_units_load_limits_from_context() {
        let engine = engine();
        let scope = MetricScope::customer(BIZ, "c1");
        engine
            .ensure_metric(&scope, spec("seats", None), Some(Credential::new("key_1")))
            .await
            .unwrap();
        let snap = engine.snapshot(&scope, &MetricName::new("seats")).await.unwrap();
        assert_eq!(snap.limit.map(|l| l.limit_value), Some(3.0));
        assert_eq!(snap.created_by, Some(Credential::new("key_1")));
        // The business-scope unit of the same name is a different unit.
        assert!(engine.lookup_metric(&biz(), &MetricName::new("seats")).is_none());
    }

    #[tokio::test]
    async fn stripe_billing_tick_is_raised_on_creation() {
        let engine = engine();
        let mut s = MetricSpec::new("invoices");
        s.metric_type = MetricType::StripeBilling;
        s.tick_type = TickType::FiveSeconds;
        let handle = engine.ensure_metric(&biz(), s, None).await.unwrap();
        assert_eq!(handle.tick_type(), TickType::OneHour);
    }

    #[tokio::test]
    async fn zero_sum_record_and_repeated_status_are_stable() {
        let engine = engine();
        let name = MetricName::new("m");
        engine
            .ensure_metric(&biz(), spec("m", Some(deny_at(10.0))), None)
            .await
            .unwrap();
        engine.record(&biz(), &name, 4.0, HashMap::new(), None).unwrap();
        let before = engine.limit_status(&biz(), &name, None).await.unwrap();
        engine.record(&biz(), &name, 0.0, HashMap::new(), None).unwrap();
        let after = engine.limit_status(&biz(), &name, None).await.unwrap();
        let again = engine.limit_status(&biz(), &name, None).await.unwrap();
        assert_eq!(before, after);
        assert_eq!(after, again);
    }

    #[tokio::test]
    async fn override_does_not_mutate_the_unit() {
        let engine = engine();
        let name = MetricName::new("m");
        engine
            .ensure_metric(&biz(), spec("m", Some(deny_at(100.0))), None)
            .await
            .unwrap();
        engine.record(&biz(), &name, 5.0, HashMap::new(), None).unwrap();
        let overridden = engine
            .limit_status(&biz(), &name, Some(deny_at(5.0)))
            .await
            .unwrap();
        assert!(overridden.is_breached);
        let own = engine.limit_status(&biz(), &name, None).await.unwrap();
        assert!(!own.is_breached);
        assert_eq!(own.limit_value, Some(100.0));
    }

    #[tokio::test]
    async fn no_limit_is_never_breached() {
        let engine = engine();
        let name = MetricName::new("free");
        engine.ensure_metric(&biz(), spec("free", None), None).await.unwrap();
        engine.record(&biz(), &name, 1e9, HashMap::new(), None).unwrap();
        let status = engine.limit_status(&biz(), &name, None).await.unwrap();
        assert!(!status.is_breached);
        assert!(status.limit_value.is_none());
    }

    #[tokio::test]
    async fn operations_aggregate() {
        let engine = engine();
        for (name, op) in [
            ("max", MetricOperation::Max),
            ("min", MetricOperation::Min),
            ("avg", MetricOperation::Avg),
            ("count", MetricOperation::Count),
        ] {
            let mut s = spec(name, None);
            s.operation = op;
            s.initial_value = 5.0;
            engine.ensure_metric(&biz(), s, None).await.unwrap();
            for v in [2.0, 8.0] {
                engine
                    .record(&biz(), &MetricName::new(name), v, HashMap::new(), None)
                    .unwrap();
            }
        }
        let value = |name: &'static str| {
            let engine = engine.clone();
            async move {
                engine
                    .snapshot(&biz(), &MetricName::new(name))
                    .await
                    .unwrap()
                    .current_value
            }
        };
        assert!((value("max").await - 8.0).abs() < f64::EPSILON);
        assert!((value("min").await - 2.0).abs() < f64::EPSILON);
        assert!((value("avg").await - 5.0).abs() < f64::EPSILON);
        assert!((value("count").await - 7.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn min_and_max_track_samples_from_a_zero_seed() {
        let engine = engine();
        for (name, op) in [
            ("latency_min", MetricOperation::Min),
            ("temp_max", MetricOperation::Max),
        ] {
            let mut s = MetricSpec::new(name);
            s.operation = op;
            engine.ensure_metric(&biz(), s, None).await.unwrap();
        }
        for v in [5.0, 3.0, 9.0] {
            engine
                .record(&biz(), &MetricName::new("latency_min"), v, HashMap::new(), None)
                .unwrap();
        }
        for v in [-4.0, -7.0, -2.0] {
            engine
                .record(&biz(), &MetricName::new("temp_max"), v, HashMap::new(), None)
                .unwrap();
        }
        let min = engine.snapshot(&biz(), &MetricName::new("latency_min")).await.unwrap();
        assert!((min.current_value - 3.0).abs() < f64::EPSILON);
        let max = engine.snapshot(&biz(), &MetricName::new("temp_max")).await.unwrap();
        assert!((max.current_value + 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn min_restarts_from_first_sample_after_reset_tick() {
        let engine = engine();
        let name = MetricName::new("latency_min");
        let mut s = MetricSpec::new("latency_min");
        s.operation = MetricOperation::Min;
        s.tick_type = TickType::OneMinute;
        engine.ensure_metric(&biz(), s, None).await.unwrap();
        engine.record(&biz(), &name, 4.0, HashMap::new(), None).unwrap();

        engine.tick(TickType::OneMinute);
        for v in [12.0, 8.0] {
            engine.record(&biz(), &name, v, HashMap::new(), None).unwrap();
        }
        let snapshot = engine.snapshot(&biz(), &name).await.unwrap();
        assert!((snapshot.current_value - 8.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn reset_ticks_zero_only_reset_metrics_on_their_interval() {
        let engine = engine();
        let mut reset = MetricSpec::new("per_minute");
        reset.tick_type = TickType::OneMinute;
        let mut checkpoint = spec("total", None);
        checkpoint.tick_type = TickType::OneMinute;
        checkpoint.cleanup_after = "never".into();
        engine.ensure_metric(&biz(), reset, None).await.unwrap();
        engine.ensure_metric(&biz(), checkpoint, None).await.unwrap();
        for name in ["per_minute", "total"] {
            engine
                .record(&biz(), &MetricName::new(name), 7.0, HashMap::new(), None)
                .unwrap();
        }

        engine.tick(TickType::OneHour);
        let per_minute = engine.snapshot(&biz(), &MetricName::new("per_minute")).await.unwrap();
        assert!((per_minute.current_value - 7.0).abs() < f64::EPSILON);

        engine.tick(TickType::OneMinute);
        let per_minute = engine.snapshot(&biz(), &MetricName::new("per_minute")).await.unwrap();
        let total = engine.snapshot(&biz(), &MetricName::new("total")).await.unwrap();
        assert!(per_minute.current_value.abs() < f64::EPSILON);
        assert!((total.current_value - 7.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn reset_metrics_report_time_to_reset() {
        let engine = engine();
        let mut s = MetricSpec::new("per_minute");
        s.tick_type = TickType::OneMinute;
        engine.ensure_metric(&biz(), s, None).await.unwrap();
        let status = engine
            .limit_status(&biz(), &MetricName::new("per_minute"), None)
            .await
            .unwrap();
        let left = status.resets_in_seconds.unwrap();
        assert!((1..=60).contains(&left));

        engine.ensure_metric(&biz(), spec("total", None), None).await.unwrap();
        let status = engine
            .limit_status(&biz(), &MetricName::new("total"), None)
            .await
            .unwrap();
        assert!(status.resets_in_seconds.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn time_to_reset_follows_the_tick_loop_phase() {
        let engine = Engine::builder()
            .store(seeded_store())
            .config(EngineConfig {
                ask_timeout: Duration::from_secs(1),
                enable_ticks: true,
            })
            .build()
            .unwrap();
        tokio::time::advance(Duration::from_secs(50)).await;

        let name = MetricName::new("per_minute");
        let mut s = MetricSpec::new("per_minute");
        s.tick_type = TickType::OneMinute;
        engine.ensure_metric(&biz(), s, None).await.unwrap();
        engine.record(&biz(), &name, 7.0, HashMap::new(), None).unwrap();
        let status = engine.limit_status(&biz(), &name, None).await.unwrap();
        let left = status.resets_in_seconds.unwrap();
        assert!((9..=10).contains(&left), "reported {left}s");

        tokio::time::sleep(Duration::from_secs(11)).await;
        let snap = engine.snapshot(&biz(), &name).await.unwrap();
        assert_eq!(snap.current_value, 0.0);
        engine.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn inactive_units_are_reaped_on_their_tick() {
        let engine = engine();
        let mut s = spec("short", None);
        s.tick_type = TickType::OneSecond;
        s.cleanup_after = "5s".into();
        engine.ensure_metric(&biz(), s, None).await.unwrap();
        let mut forever = spec("forever", None);
        forever.tick_type = TickType::OneSecond;
        forever.cleanup_after = "never".into();
        engine.ensure_metric(&biz(), forever, None).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        engine.tick(TickType::OneSecond);
        engine.snapshot(&biz(), &MetricName::new("short")).await.unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        let short = engine.lookup_metric(&biz(), &MetricName::new("short")).unwrap();
        engine.tick(TickType::OneSecond);
        let err = short.snapshot(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, EngineError::Stopped(_)));

        assert!(engine.lookup_metric(&biz(), &MetricName::new("short")).is_none());
        assert!(engine.lookup_metric(&biz(), &MetricName::new("forever")).is_some());
        assert_eq!(engine.metrics().snapshot().units_reaped, 1);
    }

    #[tokio::test]
    async fn plan_change_keeps_value_and_swaps_limit() {
        let engine = engine();
        let name = MetricName::new("api_calls");
        engine
            .ensure_metric(&biz(), spec("api_calls", Some(deny_at(100.0))), None)
            .await
            .unwrap();
        engine.ensure_metric(&biz(), spec("other", None), None).await.unwrap();
        engine.record(&biz(), &name, 50.0, HashMap::new(), None).unwrap();

        let updated = engine
            .notify_plan_change(
                &BusinessId::new(BIZ),
                None,
                Some(vec![plan_limit("api_calls", 40.0, BreachAction::Deny)]),
            )
            .await
            .unwrap();
        assert_eq!(updated, 1);

        let status = engine.limit_status(&biz(), &name, None).await.unwrap();
        assert!((status.current_usage - 50.0).abs() < f64::EPSILON);
        assert_eq!(status.limit_value, Some(40.0));
        assert!(status.is_breached);
    }

    #[tokio::test]
    async fn plan_change_reloads_from_store() {
        let store = seeded_store();
        let engine = engine_with(Arc::clone(&store));
        engine
            .ensure_metric(&biz(), spec("api_calls", None), None)
            .await
            .unwrap();
        store.set_plan_limits(
            &BusinessId::new(BIZ),
            vec![plan_limit("api_calls", 2.0, BreachAction::Deny)],
        );
        let updated = engine
            .notify_plan_change(&BusinessId::new(BIZ), None, None)
            .await
            .unwrap();
        assert_eq!(updated, 1);
        let status = engine
            .limit_status(&biz(), &MetricName::new("api_calls"), None)
            .await
            .unwrap();
        assert_eq!(status.limit_value, Some(2.0));
    }

    #[tokio::test]
    async fn plan_change_without_coordinator_is_a_no_op() {
        let engine = engine();
        let updated = engine
            .notify_plan_change(&BusinessId::new(BIZ), Some(&CustomerId::new("c1")), None)
            .await
            .unwrap();
        assert_eq!(updated, 0);
    }

    #[tokio::test]
    async fn stripe_reset_only_touches_billing_units() {
        let engine = engine();
        let mut billing = MetricSpec::new("invoices");
        billing.metric_type = MetricType::StripeBilling;
        engine.ensure_metric(&biz(), billing, None).await.unwrap();
        engine.ensure_metric(&biz(), spec("total", None), None).await.unwrap();
        let mut customer_billing = MetricSpec::new("invoices");
        customer_billing.metric_type = MetricType::StripeBilling;
        let customer = MetricScope::customer(BIZ, "c1");
        engine
            .ensure_metric(&customer, customer_billing, None)
            .await
            .unwrap();
        for scope in [&biz(), &customer] {
            engine
                .record(scope, &MetricName::new("invoices"), 9.0, HashMap::new(), None)
                .unwrap();
        }
        engine
            .record(&biz(), &MetricName::new("total"), 9.0, HashMap::new(), None)
            .unwrap();

        let reset = engine
            .reset_stripe_metrics(&BusinessId::new(BIZ))
            .await
            .unwrap();
        assert_eq!(reset, 2);

        for scope in [&biz(), &customer] {
            let snap = engine.snapshot(scope, &MetricName::new("invoices")).await.unwrap();
            assert!(snap.current_value.abs() < f64::EPSILON);
        }
        let total = engine.snapshot(&biz(), &MetricName::new("total")).await.unwrap();
        assert!((total.current_value - 9.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn shutdown_removes_unit_from_directory() {
        let engine = engine();
        let name = MetricName::new("m");
        let handle = engine.ensure_metric(&biz(), spec("m", None), None).await.unwrap();
        assert!(engine.shutdown_metric(&biz(), &name));
        let err = handle.snapshot(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, EngineError::Stopped(_)));
        assert!(engine.lookup_metric(&biz(), &name).is_none());
        assert!(!engine.shutdown_metric(&biz(), &name));
        assert!(matches!(
            engine.limit_status(&biz(), &name, None).await,
            Err(EngineError::NotFound(_))
        ));

        // A fresh ensure brings up a new incarnation.
        engine.ensure_metric(&biz(), spec("m", None), None).await.unwrap();
        assert_eq!(engine.metrics().snapshot().units_spawned, 2);
    }

    #[tokio::test]
    async fn metric_actor_is_served_by_the_coordinator() {
        let engine = engine();
        let name = MetricName::new("m");
        assert!(engine.metric_actor(&biz(), &name).await.unwrap().is_none());
        engine.ensure_metric(&biz(), spec("m", None), None).await.unwrap();
        let found = engine.metric_actor(&biz(), &name).await.unwrap().unwrap();
        assert_eq!(found.metric_name(), &name);
        assert!(
            engine
                .metric_actor(&biz(), &MetricName::new("other"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn pushed_customer_context_replaces_held_one() {
        let engine = engine();
        let tenant = engine
            .ensure_customer(BusinessId::new(BIZ), CustomerId::new("c1"), None, None)
            .await
            .unwrap();
        let mut ctx = CustomerContext::new(Customer::new(BIZ, "c1"));
        ctx.plan_limits.push(plan_limit("seats", 99.0, BreachAction::Deny));
        engine
            .ensure_customer(BusinessId::new(BIZ), CustomerId::new("c1"), Some(ctx), None)
            .await
            .unwrap();
        let held = tenant.context(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(held.plan_limits[0].limit_value, 99.0);
    }

    #[tokio::test]
    async fn webhook_breaches_notify_once_per_crossing() {
        let collector = Arc::new(Collector::default());
        let engine = Engine::builder()
            .store(seeded_store())
            .breach_notifier(Arc::clone(&collector) as Arc<dyn BreachNotifier>)
            .config(EngineConfig {
                enable_ticks: false,
                ..EngineConfig::default()
            })
            .build()
            .unwrap();
        let name = MetricName::new("calls");
        let mut s = MetricSpec::new("calls");
        s.limit = Some(LimitConfig {
            limit_value: 10.0,
            limit_operator: LimitOperator::Gte,
            breach_action: BreachAction::Webhook,
            webhook_urls: vec!["https://hooks.example.com/x".into()],
        });
        engine.ensure_metric(&biz(), s, None).await.unwrap();

        for _ in 0..3 {
            engine.record(&biz(), &name, 6.0, HashMap::new(), None).unwrap();
        }
        engine.limit_status(&biz(), &name, None).await.unwrap();
        settle(|| !collector.events.lock().is_empty()).await;
        assert_eq!(collector.events.lock().len(), 1);

        // Reset re-arms; crossing again notifies again.
        engine.tick(TickType::OneHour);
        engine.record(&biz(), &name, 12.0, HashMap::new(), None).unwrap();
        engine.limit_status(&biz(), &name, None).await.unwrap();
        settle(|| collector.events.lock().len() >= 2).await;

        let events = collector.events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].webhook_urls, vec!["https://hooks.example.com/x".to_owned()]);
        assert!(events[0].status.is_breached);
    }

    #[tokio::test]
    async fn ticks_flush_usage_snapshots() {
        let collector = Arc::new(Collector::default());
        let engine = Engine::builder()
            .store(seeded_store())
            .usage_sink(Arc::clone(&collector) as Arc<dyn UsageSink>)
            .config(EngineConfig {
                enable_ticks: false,
                ..EngineConfig::default()
            })
            .build()
            .unwrap();
        let mut s = MetricSpec::new("per_minute");
        s.tick_type = TickType::OneMinute;
        engine
            .ensure_metric(&biz(), s, Some(Credential::new("key_1")))
            .await
            .unwrap();
        engine
            .record(&biz(), &MetricName::new("per_minute"), 4.0, HashMap::new(), None)
            .unwrap();
        engine.tick(TickType::OneMinute);
        engine
            .snapshot(&biz(), &MetricName::new("per_minute"))
            .await
            .unwrap();
        settle(|| !collector.snapshots.lock().is_empty()).await;

        let snapshots = collector.snapshots.lock();
        assert_eq!(snapshots.len(), 1);
        assert!((snapshots[0].value - 4.0).abs() < f64::EPSILON);
        assert_eq!(snapshots[0].created_by, Some(Credential::new("key_1")));
    }

    #[tokio::test]
    async fn shutdown_stops_everything() {
        let engine = engine();
        let unit = engine.ensure_metric(&biz(), spec("m", None), None).await.unwrap();
        engine
            .ensure_metric(&MetricScope::customer(BIZ, "c1"), spec("m", None), None)
            .await
            .unwrap();
        engine.shutdown(Duration::from_secs(2)).await;
        assert!(matches!(
            unit.snapshot(Duration::from_secs(1)).await,
            Err(EngineError::Stopped(_))
        ));
        assert!(matches!(
            engine.ensure_business(BusinessId::new(BIZ), None).await,
            Err(EngineError::Stopped(_))
        ));
    }
}
