//! The metric tracking unit.
//!
//! One task per `(scope, metric_name)` owns the running value and processes
//! its mailbox strictly in order. Mutations (`Record`, `CleanupTick`,
//! `PlanLimitChanged`, `ResetStripeMetrics`) are fire-and-forget; reads go
//! through [`ask`](crate::ask::ask) with a deadline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use tracktags_core::{
    BreachAction, BreachEvent, BreachStatus, Credential, LimitConfig, MetricName, MetricOperation,
    MetricScope, MetricSpec, MetricType, TickType, UsageSnapshot,
};

use crate::ask::ask;
use crate::directory::DirectoryEntry;
use crate::error::EngineError;
use crate::metrics::EngineMetrics;
use crate::registry::EngineContext;
use crate::scheduler::until_next_tick;

pub enum MetricMessage {
    Record {
        value: f64,
        tags: HashMap<String, String>,
        metadata: Option<serde_json::Value>,
    },
    CleanupTick {
        timestamp: DateTime<Utc>,
        tick_type: TickType,
    },
    /// Evaluate the limit. `limit_override` replaces the unit's own limit for
    /// this one evaluation and is not stored.
    GetLimitStatus {
        limit_override: Option<LimitConfig>,
        reply: oneshot::Sender<BreachStatus>,
    },
    GetSnapshot {
        reply: oneshot::Sender<MetricSnapshot>,
    },
    /// Replace the limit in place; `None` removes it. The value is kept.
    PlanLimitChanged {
        limit: Option<LimitConfig>,
    },
    ResetStripeMetrics,
    Shutdown,
}

/// Full view of a unit's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSnapshot {
    pub scope: MetricScope,
    pub metric_name: MetricName,
    pub current_value: f64,
    pub operation: MetricOperation,
    pub tick_type: TickType,
    pub metric_type: MetricType,
    pub cleanup_after_seconds: i64,
    pub limit: Option<LimitConfig>,
    pub tags: HashMap<String, String>,
    pub metadata: Option<serde_json::Value>,
    pub created_by: Option<Credential>,
}

#[derive(Debug)]
struct UnitIdentity {
    key: String,
    scope: MetricScope,
    metric_name: MetricName,
    metric_type: MetricType,
    tick_type: TickType,
}

/// Mailbox reference to a running unit.
#[derive(Debug, Clone)]
pub struct MetricHandle {
    identity: Arc<UnitIdentity>,
    instance_id: u64,
    tx: mpsc::UnboundedSender<MetricMessage>,
}

impl DirectoryEntry for MetricHandle {
    fn instance_id(&self) -> u64 {
        self.instance_id
    }

    fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl MetricHandle {
    pub fn key(&self) -> &str {
        &self.identity.key
    }

    pub fn scope(&self) -> &MetricScope {
        &self.identity.scope
    }

    pub fn metric_name(&self) -> &MetricName {
        &self.identity.metric_name
    }

    pub fn metric_type(&self) -> MetricType {
        self.identity.metric_type
    }

    pub fn tick_type(&self) -> TickType {
        self.identity.tick_type
    }

    fn send(&self, message: MetricMessage) -> Result<(), EngineError> {
        self.tx
            .send(message)
            .map_err(|_| EngineError::Stopped(self.identity.key.clone()))
    }

    pub fn record(
        &self,
        value: f64,
        tags: HashMap<String, String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), EngineError> {
        self.send(MetricMessage::Record {
            value,
            tags,
            metadata,
        })
    }

    pub fn tick(&self, timestamp: DateTime<Utc>, tick_type: TickType) -> Result<(), EngineError> {
        self.send(MetricMessage::CleanupTick {
            timestamp,
            tick_type,
        })
    }

    pub fn change_limit(&self, limit: Option<LimitConfig>) -> Result<(), EngineError> {
        self.send(MetricMessage::PlanLimitChanged { limit })
    }

    pub fn reset_stripe(&self) -> Result<(), EngineError> {
        self.send(MetricMessage::ResetStripeMetrics)
    }

    pub fn shutdown(&self) -> Result<(), EngineError> {
        self.send(MetricMessage::Shutdown)
    }

    /// Current breach status, optionally against a substitute limit.
    pub async fn limit_status(
        &self,
        limit_override: Option<LimitConfig>,
        after: Duration,
    ) -> Result<BreachStatus, EngineError> {
        ask(&self.tx, &self.identity.key, "get_limit_status", after, |reply| {
            MetricMessage::GetLimitStatus {
                limit_override,
                reply,
            }
        })
        .await
    }

    pub async fn snapshot(&self, after: Duration) -> Result<MetricSnapshot, EngineError> {
        ask(&self.tx, &self.identity.key, "get_snapshot", after, |reply| {
            MetricMessage::GetSnapshot { reply }
        })
        .await
    }
}

enum Exit {
    Shutdown,
    Reaped,
    Abandoned,
}

struct MetricUnit {
    identity: Arc<UnitIdentity>,
    instance_id: u64,
    operation: MetricOperation,
    cleanup_after_seconds: i64,
    current_value: f64,
    samples: u64,
    limit: Option<LimitConfig>,
    tags: HashMap<String, String>,
    metadata: Option<serde_json::Value>,
    created_by: Option<Credential>,
    last_activity: Instant,
    /// Cleared once a webhook breach event has been emitted; set again when
    /// the limit is no longer breached.
    breach_armed: bool,
    ctx: Arc<EngineContext>,
}

/// Start a unit for `spec` (already validated and normalized) on the
/// engine's tracker. The caller registers the returned handle.
pub(crate) fn spawn_unit(
    ctx: &Arc<EngineContext>,
    key: String,
    scope: MetricScope,
    spec: MetricSpec,
    limit: Option<LimitConfig>,
    created_by: Option<Credential>,
) -> MetricHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let instance_id = ctx.next_instance_id();
    let identity = Arc::new(UnitIdentity {
        key,
        scope,
        metric_name: spec.metric_name.clone(),
        metric_type: spec.metric_type,
        tick_type: spec.tick_type,
    });
    let now = Instant::now();
    let unit = MetricUnit {
        identity: Arc::clone(&identity),
        instance_id,
        operation: spec.operation,
        cleanup_after_seconds: spec.cleanup_after_seconds(),
        current_value: spec.initial_value,
        samples: 0,
        limit,
        tags: spec.tags,
        metadata: spec.metadata,
        created_by,
        last_activity: now,
        breach_armed: true,
        ctx: Arc::clone(ctx),
    };
    EngineMetrics::bump(&ctx.metrics.units_spawned);
    ctx.tracker.spawn(unit.run(rx));
    MetricHandle {
        identity,
        instance_id,
        tx,
    }
}

impl MetricUnit {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<MetricMessage>) {
        debug!(key = %self.identity.key, "metric unit started");
        let exit = loop {
            let Some(message) = rx.recv().await else {
                break Exit::Abandoned;
            };
            if let Some(exit) = self.handle(message) {
                break exit;
            }
        };
        // Close before deregistering so a concurrent ensure sees a dead
        // handle and replaces it.
        rx.close();
        drop(rx);
        self.ctx
            .registry
            .metrics
            .deregister(&self.identity.key, self.instance_id);

        let key = &self.identity.key;
        match exit {
            Exit::Shutdown => {
                EngineMetrics::bump(&self.ctx.metrics.units_shut_down);
                info!(%key, "metric unit shut down");
            }
            Exit::Reaped => {
                EngineMetrics::bump(&self.ctx.metrics.units_reaped);
                info!(
                    %key,
                    cleanup_after = self.cleanup_after_seconds,
                    "metric unit reaped after inactivity"
                );
            }
            Exit::Abandoned => debug!(%key, "metric unit mailbox dropped"),
        }
    }

    fn handle(&mut self, message: MetricMessage) -> Option<Exit> {
        match message {
            MetricMessage::Record {
                value,
                tags,
                metadata,
            } => {
                self.current_value = self
                    .operation
                    .combine(self.current_value, self.samples, value);
                self.samples += 1;
                self.tags.extend(tags);
                if metadata.is_some() {
                    self.metadata = metadata;
                }
                self.last_activity = Instant::now();
                EngineMetrics::bump(&self.ctx.metrics.records_applied);
                self.check_breach_edge();
            }
            MetricMessage::CleanupTick {
                timestamp,
                tick_type,
            } => return self.on_tick(timestamp, tick_type),
            MetricMessage::GetLimitStatus {
                limit_override,
                reply,
            } => {
                EngineMetrics::bump(&self.ctx.metrics.status_queries);
                let _ = reply.send(self.status(limit_override.as_ref()));
            }
            MetricMessage::GetSnapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            MetricMessage::PlanLimitChanged { limit } => {
                debug!(key = %self.identity.key, ?limit, "limit changed");
                self.limit = limit;
                self.check_breach_edge();
            }
            MetricMessage::ResetStripeMetrics => {
                if self.identity.metric_type == MetricType::StripeBilling {
                    self.flush(Utc::now());
                    self.zero();
                }
            }
            MetricMessage::Shutdown => return Some(Exit::Shutdown),
        }
        None
    }

    fn on_tick(&mut self, timestamp: DateTime<Utc>, tick_type: TickType) -> Option<Exit> {
        if tick_type != self.identity.tick_type {
            return None;
        }
        EngineMetrics::bump(&self.ctx.metrics.ticks_applied);
        self.flush(timestamp);
        if self.identity.metric_type == MetricType::Reset {
            self.zero();
        }
        if let Ok(secs) = u64::try_from(self.cleanup_after_seconds)
            && self.last_activity.elapsed() >= Duration::from_secs(secs)
        {
            return Some(Exit::Reaped);
        }
        None
    }

    fn zero(&mut self) {
        self.current_value = 0.0;
        self.samples = 0;
        self.check_breach_edge();
    }

    fn status(&self, limit_override: Option<&LimitConfig>) -> BreachStatus {
        let limit = limit_override.or(self.limit.as_ref());
        BreachStatus::evaluate(
            self.identity.metric_name.clone(),
            self.current_value,
            limit,
        )
        .with_resets_in(self.resets_in_seconds())
    }

    /// Whole seconds (rounded up) until the tick loop next resets a `Reset`
    /// metric.
    fn resets_in_seconds(&self) -> Option<u64> {
        if self.identity.metric_type != MetricType::Reset {
            return None;
        }
        let left = until_next_tick(self.ctx.tick_epoch, self.identity.tick_type);
        Some((left.as_secs() + u64::from(left.subsec_nanos() > 0)).max(1))
    }

    fn snapshot(&self) -> MetricSnapshot {
        MetricSnapshot {
            scope: self.identity.scope.clone(),
            metric_name: self.identity.metric_name.clone(),
            current_value: self.current_value,
            operation: self.operation,
            tick_type: self.identity.tick_type,
            metric_type: self.identity.metric_type,
            cleanup_after_seconds: self.cleanup_after_seconds,
            limit: self.limit.clone(),
            tags: self.tags.clone(),
            metadata: self.metadata.clone(),
            created_by: self.created_by.clone(),
        }
    }

    fn check_breach_edge(&mut self) {
        let Some(limit) = &self.limit else {
            self.breach_armed = true;
            return;
        };
        if !limit.evaluate(self.current_value).is_breached {
            self.breach_armed = true;
            return;
        }
        if limit.breach_action == BreachAction::Webhook && self.breach_armed {
            self.breach_armed = false;
            self.emit_breach();
        }
    }

    fn emit_breach(&self) {
        let Some(notifier) = self.ctx.notifier.clone() else {
            return;
        };
        let webhook_urls = self
            .limit
            .as_ref()
            .map(|l| l.webhook_urls.clone())
            .unwrap_or_default();
        let event = BreachEvent {
            scope: self.identity.scope.clone(),
            status: self.status(None),
            webhook_urls,
            occurred_at: Utc::now(),
        };
        EngineMetrics::bump(&self.ctx.metrics.breach_events);
        info!(
            key = %self.identity.key,
            value = self.current_value,
            "limit breached, notifying webhooks"
        );
        self.ctx.tracker.spawn(async move {
            if let Err(e) = notifier.notify(&event).await {
                warn!(error = %e, metric = %event.status.metric_name, "breach notification failed");
            }
        });
    }

    fn flush(&self, timestamp: DateTime<Utc>) {
        let Some(sink) = self.ctx.usage_sink.clone() else {
            return;
        };
        let snapshot = UsageSnapshot {
            scope: self.identity.scope.clone(),
            metric_name: self.identity.metric_name.clone(),
            value: self.current_value,
            operation: self.operation,
            metric_type: self.identity.metric_type,
            tick_type: self.identity.tick_type,
            recorded_at: timestamp,
            created_by: self.created_by.clone(),
        };
        let metrics = Arc::clone(&self.ctx.metrics);
        self.ctx.tracker.spawn(async move {
            match sink.flush(&snapshot).await {
                Ok(()) => EngineMetrics::bump(&metrics.snapshots_flushed),
                Err(e) => warn!(error = %e, metric = %snapshot.metric_name, "usage flush failed"),
            }
        });
    }
}
