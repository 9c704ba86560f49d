use std::sync::Arc;

use async_trait::async_trait;

use tracktags_core::{BreachEvent, UsageSnapshot};
use tracktags_store::{PlanStore, StoreError};

use crate::error::NotifyError;

/// Receives breach events from units whose limit action is `webhook`.
#[async_trait]
pub trait BreachNotifier: Send + Sync {
    async fn notify(&self, event: &BreachEvent) -> Result<(), NotifyError>;
}

/// Receives usage snapshots flushed on ticks.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn flush(&self, snapshot: &UsageSnapshot) -> Result<(), StoreError>;
}

/// Writes snapshots to the plan store.
pub struct StoreUsageSink {
    store: Arc<dyn PlanStore>,
}

impl StoreUsageSink {
    pub fn new(store: Arc<dyn PlanStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl UsageSink for StoreUsageSink {
    async fn flush(&self, snapshot: &UsageSnapshot) -> Result<(), StoreError> {
        self.store.save_usage_snapshot(snapshot).await
    }
}
