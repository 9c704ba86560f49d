use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use tracktags_core::{
    Business, BusinessId, CustomerContext, CustomerId, PlanLimit, UsageSnapshot,
};
use tracktags_store::{ApiKeyRecord, EncryptedWebhookSecrets, PlanStore, StoreError};

/// Everything held for one business.
#[derive(Debug, Clone)]
struct BusinessEntry {
    business: Business,
    plan_limits: Vec<PlanLimit>,
    free_tier_limits: Vec<PlanLimit>,
    webhook_secrets: Option<EncryptedWebhookSecrets>,
}

/// In-memory [`PlanStore`] backed by [`DashMap`]s.
///
/// Usage snapshots are kept in a ring of at most `snapshot_capacity`
/// entries; the oldest is dropped first.
#[derive(Debug)]
pub struct MemoryPlanStore {
    businesses: DashMap<BusinessId, BusinessEntry>,
    customers: DashMap<(BusinessId, CustomerId), CustomerContext>,
    api_keys: DashMap<String, ApiKeyRecord>,
    snapshots: Mutex<VecDeque<UsageSnapshot>>,
    snapshot_capacity: usize,
}

/// Snapshots retained by a store built with [`MemoryPlanStore::new`].
pub const DEFAULT_SNAPSHOT_CAPACITY: usize = 10_000;

impl Default for MemoryPlanStore {
    fn default() -> Self {
        Self {
            businesses: DashMap::new(),
            customers: DashMap::new(),
            api_keys: DashMap::new(),
            snapshots: Mutex::new(VecDeque::new()),
            snapshot_capacity: DEFAULT_SNAPSHOT_CAPACITY,
        }
    }
}

impl MemoryPlanStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Retain at most `capacity` usage snapshots. Zero keeps none.
    #[must_use]
    pub fn with_snapshot_capacity(mut self, capacity: usize) -> Self {
        self.snapshot_capacity = capacity;
        self.snapshots.get_mut().truncate(capacity);
        self
    }

    /// Insert or replace a business row, keeping its limits and secrets.
    pub fn put_business(&self, business: Business) {
        self.businesses
            .entry(business.business_id.clone())
            .and_modify(|e| e.business = business.clone())
            .or_insert_with(|| BusinessEntry {
                business,
                plan_limits: Vec::new(),
                free_tier_limits: Vec::new(),
                webhook_secrets: None,
            });
    }

    /// Replace the business-scoped plan limits. Returns `false` if the
    /// business is unknown.
    pub fn set_plan_limits(&self, business_id: &BusinessId, limits: Vec<PlanLimit>) -> bool {
        self.businesses
            .get_mut(business_id)
            .map(|mut e| e.plan_limits = limits)
            .is_some()
    }

    /// Replace the free-tier limits. Returns `false` if the business is unknown.
    pub fn set_free_tier_limits(&self, business_id: &BusinessId, limits: Vec<PlanLimit>) -> bool {
        self.businesses
            .get_mut(business_id)
            .map(|mut e| e.free_tier_limits = limits)
            .is_some()
    }

    /// Store encrypted webhook secrets. Returns `false` if the business is unknown.
    pub fn set_webhook_secrets(
        &self,
        business_id: &BusinessId,
        secrets: EncryptedWebhookSecrets,
    ) -> bool {
        self.businesses
            .get_mut(business_id)
            .map(|mut e| e.webhook_secrets = Some(secrets))
            .is_some()
    }

    /// Insert or replace a customer context.
    pub fn put_customer(&self, context: CustomerContext) {
        let key = (
            context.customer.business_id.clone(),
            context.customer.customer_id.clone(),
        );
        self.customers.insert(key, context);
    }

    /// Register an API key record under its hash.
    pub fn put_api_key(&self, key_hash: impl Into<String>, record: ApiKeyRecord) {
        self.api_keys.insert(key_hash.into(), record);
    }

    pub fn business_count(&self) -> usize {
        self.businesses.len()
    }

    pub fn customer_count(&self) -> usize {
        self.customers.len()
    }

    /// Copy of the retained snapshots, oldest first.
    pub fn usage_snapshots(&self) -> Vec<UsageSnapshot> {
        self.snapshots.lock().iter().cloned().collect()
    }
}

#[async_trait]
impl PlanStore for MemoryPlanStore {
    async fn business(&self, business_id: &BusinessId) -> Result<Option<Business>, StoreError> {
        Ok(self.businesses.get(business_id).map(|e| e.business.clone()))
    }

    async fn business_plan_limits(
        &self,
        business_id: &BusinessId,
    ) -> Result<Vec<PlanLimit>, StoreError> {
        Ok(self
            .businesses
            .get(business_id)
            .map(|e| e.plan_limits.clone())
            .unwrap_or_default())
    }

    async fn free_tier_limits(
        &self,
        business_id: &BusinessId,
    ) -> Result<Vec<PlanLimit>, StoreError> {
        Ok(self
            .businesses
            .get(business_id)
            .map(|e| e.free_tier_limits.clone())
            .unwrap_or_default())
    }

    async fn customer_context(
        &self,
        business_id: &BusinessId,
        customer_id: &CustomerId,
    ) -> Result<Option<CustomerContext>, StoreError> {
        Ok(self
            .customers
            .get(&(business_id.clone(), customer_id.clone()))
            .map(|c| c.value().clone()))
    }

    async fn webhook_secrets(
        &self,
        business_id: &BusinessId,
    ) -> Result<Option<EncryptedWebhookSecrets>, StoreError> {
        Ok(self
            .businesses
            .get(business_id)
            .and_then(|e| e.webhook_secrets.clone()))
    }

    async fn resolve_api_key(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>, StoreError> {
        Ok(self
            .api_keys
            .get(key_hash)
            .filter(|r| !r.revoked)
            .map(|r| r.value().clone()))
    }

    async fn save_usage_snapshot(&self, snapshot: &UsageSnapshot) -> Result<(), StoreError> {
        if self.snapshot_capacity == 0 {
            return Ok(());
        }
        let mut snapshots = self.snapshots.lock();
        while snapshots.len() >= self.snapshot_capacity {
            snapshots.pop_front();
        }
        snapshots.push_back(snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tracktags_core::{
        BreachAction, Credential, Customer, LimitOperator, MetricName, MetricOperation,
        MetricScope, MetricType, TickType,
    };
    use tracktags_store::hash_api_key;

    use super::*;

    fn limit(name: &str, value: f64) -> PlanLimit {
        PlanLimit {
            metric_name: MetricName::new(name),
            limit_value: value,
            breach_operator: LimitOperator::Gte,
            breach_action: BreachAction::Deny,
            webhook_urls: vec![],
            metric_type: None,
        }
    }

    #[tokio::test]
    async fn unknown_rows_read_as_empty() {
        let store = MemoryPlanStore::new();
        let biz = BusinessId::new("nope");
        assert!(store.business(&biz).await.unwrap().is_none());
        assert!(store.business_plan_limits(&biz).await.unwrap().is_empty());
        assert!(store.free_tier_limits(&biz).await.unwrap().is_empty());
        assert!(store.webhook_secrets(&biz).await.unwrap().is_none());
        assert!(
            store
                .customer_context(&biz, &CustomerId::new("c"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn business_limits_and_secrets_round_trip() {
        let store = MemoryPlanStore::new();
        let biz = BusinessId::new("acme");
        assert!(!store.set_plan_limits(&biz, vec![limit("api_calls", 10.0)]));

        store.put_business(Business::new("acme"));
        assert!(store.set_plan_limits(&biz, vec![limit("api_calls", 10.0)]));
        assert!(store.set_free_tier_limits(&biz, vec![limit("api_calls", 1.0)]));
        assert!(store.set_webhook_secrets(
            &biz,
            EncryptedWebhookSecrets {
                primary: "blob".into(),
                secondary: None,
            }
        ));

        // Replacing the row keeps limits.
        let mut renamed = Business::new("acme");
        renamed.name = "Acme Inc".into();
        store.put_business(renamed);

        assert_eq!(store.business(&biz).await.unwrap().unwrap().name, "Acme Inc");
        assert_eq!(store.business_plan_limits(&biz).await.unwrap().len(), 1);
        let free_tier = store.free_tier_limits(&biz).await.unwrap();
        assert!((free_tier[0].limit_value - 1.0).abs() < f64::EPSILON);
        assert_eq!(
            store.webhook_secrets(&biz).await.unwrap().unwrap().primary,
            "blob"
        );
    }

    #[tokio::test]
    async fn customers_are_keyed_per_business() {
        let store = MemoryPlanStore::new();
        store.put_customer(CustomerContext::new(Customer::new("acme", "c1")));
        assert!(
            store
                .customer_context(&BusinessId::new("acme"), &CustomerId::new("c1"))
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            store
                .customer_context(&BusinessId::new("other"), &CustomerId::new("c1"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn revoked_keys_do_not_resolve() {
        let store = MemoryPlanStore::new();
        store.put_api_key(
            hash_api_key("live"),
            ApiKeyRecord {
                key_id: Credential::new("key_1"),
                business_id: BusinessId::new("acme"),
                revoked: false,
            },
        );
        store.put_api_key(
            hash_api_key("dead"),
            ApiKeyRecord {
                key_id: Credential::new("key_2"),
                business_id: BusinessId::new("acme"),
                revoked: true,
            },
        );
        let live = store.resolve_api_key(&hash_api_key("live")).await.unwrap();
        assert_eq!(live.unwrap().key_id.as_str(), "key_1");
        assert!(store.resolve_api_key(&hash_api_key("dead")).await.unwrap().is_none());
        assert!(store.resolve_api_key("live").await.unwrap().is_none());
    }

    fn usage(value: f64) -> UsageSnapshot {
        UsageSnapshot {
            scope: MetricScope::business("acme"),
            metric_name: MetricName::new("api_calls"),
            value,
            operation: MetricOperation::Sum,
            metric_type: MetricType::Reset,
            tick_type: TickType::OneMinute,
            recorded_at: Utc::now(),
            created_by: None,
        }
    }

    #[tokio::test]
    async fn snapshots_accumulate() {
        let store = MemoryPlanStore::new();
        store.save_usage_snapshot(&usage(3.0)).await.unwrap();
        store.save_usage_snapshot(&usage(3.0)).await.unwrap();
        assert_eq!(store.usage_snapshots().len(), 2);
    }

    #[tokio::test]
    async fn snapshot_ring_drops_oldest_past_capacity() {
        let store = MemoryPlanStore::new().with_snapshot_capacity(3);
        for i in 0..10 {
            store.save_usage_snapshot(&usage(f64::from(i))).await.unwrap();
        }
        let values: Vec<f64> = store.usage_snapshots().iter().map(|s| s.value).collect();
        assert_eq!(values, vec![7.0, 8.0, 9.0]);
    }

    #[tokio::test]
    async fn zero_capacity_keeps_no_snapshots() {
        let store = MemoryPlanStore::new().with_snapshot_capacity(0);
        store.save_usage_snapshot(&usage(1.0)).await.unwrap();
        assert!(store.usage_snapshots().is_empty());
    }
}
