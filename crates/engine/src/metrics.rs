use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters describing engine activity.
///
/// Relaxed ordering throughout; use [`snapshot`](Self::snapshot) for a
/// plain copy.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Metric tracking units started.
    pub units_spawned: AtomicU64,
    /// Units that terminated through their cleanup policy.
    pub units_reaped: AtomicU64,
    /// Units stopped by an explicit shutdown.
    pub units_shut_down: AtomicU64,
    /// Tenant coordinators started.
    pub coordinators_spawned: AtomicU64,
    pub records_applied: AtomicU64,
    pub status_queries: AtomicU64,
    /// Ticks that matched a unit's own tick type.
    pub ticks_applied: AtomicU64,
    pub snapshots_flushed: AtomicU64,
    pub breach_events: AtomicU64,
    /// Bounded asks that hit their deadline.
    pub ask_timeouts: AtomicU64,
}

impl EngineMetrics {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EngineMetricsSnapshot {
        EngineMetricsSnapshot {
            units_spawned: self.units_spawned.load(Ordering::Relaxed),
            units_reaped: self.units_reaped.load(Ordering::Relaxed),
            units_shut_down: self.units_shut_down.load(Ordering::Relaxed),
            coordinators_spawned: self.coordinators_spawned.load(Ordering::Relaxed),
            records_applied: self.records_applied.load(Ordering::Relaxed),
            status_queries: self.status_queries.load(Ordering::Relaxed),
            ticks_applied: self.ticks_applied.load(Ordering::Relaxed),
            snapshots_flushed: self.snapshots_flushed.load(Ordering::Relaxed),
            breach_events: self.breach_events.load(Ordering::Relaxed),
            ask_timeouts: self.ask_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`EngineMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineMetricsSnapshot {
    pub units_spawned: u64,
    pub units_reaped: u64,
    pub units_shut_down: u64,
    pub coordinators_spawned: u64,
    pub records_applied: u64,
    pub status_queries: u64,
    pub ticks_applied: u64,
    pub snapshots_flushed: u64,
    pub breach_events: u64,
    pub ask_timeouts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_bumps() {
        let metrics = EngineMetrics::default();
        EngineMetrics::bump(&metrics.units_spawned);
        EngineMetrics::bump(&metrics.units_spawned);
        EngineMetrics::bump(&metrics.ask_timeouts);
        let snap = metrics.snapshot();
        assert_eq!(snap.units_spawned, 2);
        assert_eq!(snap.ask_timeouts, 1);
        assert_eq!(snap.records_applied, 0);
    }
}
