use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters tracking admission outcomes.
///
/// All counters use relaxed ordering. For a consistent point-in-time view,
/// call [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    /// Calls admitted and forwarded.
    pub allowed: AtomicU64,
    /// Calls refused because a deny limit is breached.
    pub denied: AtomicU64,
    /// Calls naming a metric without a running unit.
    pub not_provisioned: AtomicU64,
    pub loops_rejected: AtomicU64,
    pub double_proxies_rejected: AtomicU64,
    /// Calls to domains that have not authorized the business.
    pub domains_refused: AtomicU64,
    /// Forwards or authorization-file fetches that failed upstream.
    pub upstream_errors: AtomicU64,
    /// Status queries that exceeded their deadline.
    pub timeouts: AtomicU64,
}

impl GatewayMetrics {
    pub fn increment_allowed(&self) {
        self.allowed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_denied(&self) {
        self.denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_not_provisioned(&self) {
        self.not_provisioned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_loops_rejected(&self) {
        self.loops_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_double_proxies_rejected(&self) {
        self.double_proxies_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_domains_refused(&self) {
        self.domains_refused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_upstream_errors(&self) {
        self.upstream_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> GatewayMetricsSnapshot {
        GatewayMetricsSnapshot {
            allowed: self.allowed.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            not_provisioned: self.not_provisioned.load(Ordering::Relaxed),
            loops_rejected: self.loops_rejected.load(Ordering::Relaxed),
            double_proxies_rejected: self.double_proxies_rejected.load(Ordering::Relaxed),
            domains_refused: self.domains_refused.load(Ordering::Relaxed),
            upstream_errors: self.upstream_errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// A plain-data copy of [`GatewayMetrics`] at a single point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GatewayMetricsSnapshot {
    pub allowed: u64,
    pub denied: u64,
    pub not_provisioned: u64,
    pub loops_rejected: u64,
    pub double_proxies_rejected: u64,
    pub domains_refused: u64,
    pub upstream_errors: u64,
    pub timeouts: u64,
}
