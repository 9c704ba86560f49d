//! Tick delivery.
//!
//! One loop per [`TickType`] broadcasts `CleanupTick` to every live unit at
//! that interval. Units ignore ticks that are not their own. Every loop
//! fires at `tick_epoch + n * period`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use tracktags_core::TickType;

use crate::registry::{EngineContext, Registry};

pub(crate) fn spawn_tick_loops(ctx: &Arc<EngineContext>, token: &CancellationToken) {
    for tick_type in TickType::ALL {
        let loop_ctx = Arc::clone(ctx);
        let token = token.clone();
        ctx.tracker
            .spawn(async move { run_tick_loop(&loop_ctx, tick_type, token).await });
    }
    info!(loops = TickType::ALL.len(), "tick scheduler started");
}

async fn run_tick_loop(ctx: &EngineContext, tick_type: TickType, token: CancellationToken) {
    let period = tick_type.duration();
    let mut ticker = interval_at(ctx.tick_epoch + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            () = token.cancelled() => {
                debug!(tick = %tick_type, "tick loop stopped");
                break;
            }
            _ = ticker.tick() => {
                let delivered = broadcast_tick(&ctx.registry, tick_type, Utc::now());
                debug!(tick = %tick_type, delivered, "tick broadcast");
            }
        }
    }
}

/// Time until the tick loop for `tick_type` next fires.
pub(crate) fn until_next_tick(epoch: Instant, tick_type: TickType) -> Duration {
    let period = tick_type.duration();
    let period_nanos = period.as_nanos();
    let into = epoch.elapsed().as_nanos() % period_nanos;
    let into = u64::try_from(into).map_or(Duration::ZERO, Duration::from_nanos);
    period.saturating_sub(into)
}

/// Send one tick to every live unit. Returns how many units were reached.
pub(crate) fn broadcast_tick(
    registry: &Registry,
    tick_type: TickType,
    timestamp: DateTime<Utc>,
) -> usize {
    registry
        .metrics
        .handles()
        .iter()
        .filter(|h| h.tick(timestamp, tick_type).is_ok())
        .count()
}
