use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::task::TaskTracker;

use tracktags_core::{MetricName, MetricScope};
use tracktags_store::PlanStore;

use crate::directory::Directory;
use crate::metrics::EngineMetrics;
use crate::notify::{BreachNotifier, UsageSink};
use crate::tenant::TenantHandle;
use crate::unit::MetricHandle;

/// The directories of one engine instance, built once at startup.
#[derive(Debug, Default)]
pub struct Registry {
    pub(crate) metrics: Arc<Directory<MetricHandle>>,
    pub(crate) businesses: Directory<TenantHandle>,
    pub(crate) customers: Directory<TenantHandle>,
}

impl Registry {
    pub fn metric_count(&self) -> usize {
        self.metrics.len()
    }

    pub fn tenant_count(&self) -> usize {
        self.businesses.len() + self.customers.len()
    }

    pub(crate) fn tenants_for(&self, scope: &MetricScope) -> &Directory<TenantHandle> {
        match scope {
            MetricScope::Business { .. } => &self.businesses,
            MetricScope::Customer { .. } => &self.customers,
        }
    }
}

/// Lookup-only view of the metric directory.
///
/// This is what request paths that must never create units (the admission
/// gateway) receive: it has no way to spawn or register.
#[derive(Debug, Clone)]
pub struct MetricDirectoryReader {
    metrics: Arc<Directory<MetricHandle>>,
    ask_timeout: Duration,
}

impl MetricDirectoryReader {
    pub(crate) fn new(metrics: Arc<Directory<MetricHandle>>, ask_timeout: Duration) -> Self {
        Self {
            metrics,
            ask_timeout,
        }
    }

    /// The live unit for `metric_name` in `scope`, if one is running.
    pub fn lookup(&self, scope: &MetricScope, metric_name: &MetricName) -> Option<MetricHandle> {
        self.metrics.lookup(&scope.metric_key(metric_name))
    }

    /// Deadline for status queries made through this reader.
    pub fn ask_timeout(&self) -> Duration {
        self.ask_timeout
    }
}

/// State shared by every task of one engine.
pub(crate) struct EngineContext {
    pub registry: Registry,
    pub store: Arc<dyn PlanStore>,
    pub metrics: Arc<EngineMetrics>,
    pub notifier: Option<Arc<dyn BreachNotifier>>,
    pub usage_sink: Option<Arc<dyn UsageSink>>,
    pub tracker: TaskTracker,
    pub ask_timeout: Duration,
    /// Phase origin of every tick loop.
    pub tick_epoch: Instant,
    next_instance: AtomicU64,
}

impl EngineContext {
    pub fn new(
        store: Arc<dyn PlanStore>,
        notifier: Option<Arc<dyn BreachNotifier>>,
        usage_sink: Option<Arc<dyn UsageSink>>,
        ask_timeout: Duration,
    ) -> Self {
        Self {
            registry: Registry::default(),
            store,
            metrics: Arc::new(EngineMetrics::default()),
            notifier,
            usage_sink,
            tracker: TaskTracker::new(),
            ask_timeout,
            tick_epoch: Instant::now(),
            next_instance: AtomicU64::new(1),
        }
    }

    pub fn next_instance_id(&self) -> u64 {
        self.next_instance.fetch_add(1, Ordering::Relaxed)
    }
}
