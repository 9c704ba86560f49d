//! Named TTL cache with single-flight computation.
//!
//! Entries are addressed by `(cache_name, key)` so one instance can hold
//! several logical caches. Every entry carries its own time-to-live.
//! [`TtlCache::fetch`] coalesces concurrent misses for the same key into a
//! single computation; failed computations are not stored.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::future::Cache;

type CacheKey = (String, String);

#[derive(Clone)]
struct Entry<V> {
    value: V,
    ttl: Duration,
}

struct EntryTtl;

impl<V> Expiry<CacheKey, Entry<V>> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        entry: &Entry<V>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        entry: &Entry<V>,
        _updated_at: Instant,
        _remaining: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// A bounded cache of values with per-entry expiry, backed by [`moka`].
#[derive(Clone)]
pub struct TtlCache<V> {
    inner: Cache<CacheKey, Entry<V>>,
    default_ttl: Duration,
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache holding at most `max_capacity` entries. `default_ttl`
    /// applies to [`put`](Self::put) calls that pass no TTL.
    pub fn new(max_capacity: u64, default_ttl: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryTtl)
            .build();
        Self { inner, default_ttl }
    }

    pub async fn get(&self, cache_name: &str, key: &str) -> Option<V> {
        self.inner
            .get(&(cache_name.to_owned(), key.to_owned()))
            .await
            .map(|entry| entry.value)
    }

    pub async fn put(&self, cache_name: &str, key: &str, value: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.inner
            .insert((cache_name.to_owned(), key.to_owned()), Entry { value, ttl })
            .await;
    }

    /// Return the cached value, or compute, store, and return it.
    ///
    /// At most one `compute` runs per key at a time; concurrent callers for
    /// the same missing key wait for that computation and share its result.
    /// An `Err` is handed to every waiting caller and nothing is stored.
    pub async fn fetch<F, Fut, E>(
        &self,
        cache_name: &str,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<V, Arc<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Send + Sync + 'static,
    {
        self.inner
            .try_get_with((cache_name.to_owned(), key.to_owned()), async move {
                compute().await.map(|value| Entry { value, ttl })
            })
            .await
            .map(|entry| entry.value)
    }

    pub async fn invalidate(&self, cache_name: &str, key: &str) {
        self.inner
            .invalidate(&(cache_name.to_owned(), key.to_owned()))
            .await;
    }
}
