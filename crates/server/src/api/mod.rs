pub mod billing;
pub mod health;
pub mod metrics;
pub mod plans;
pub mod proxy;
pub mod schemas;
pub mod trace_context;

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use tracktags_engine::Engine;
use tracktags_gateway::AdmissionGateway;

use crate::auth::Authenticator;
use crate::auth::middleware::require_caller;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The metering engine; the only path that provisions metric units.
    pub engine: Engine,
    pub gateway: Arc<AdmissionGateway>,
    pub auth: Arc<Authenticator>,
    /// Route of the admission proxy (`/proxy` by default).
    pub proxy_path: String,
}

/// Build the Axum router with all API routes and middleware.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics));

    let protected = Router::new()
        .route(&state.proxy_path, post(proxy::proxy))
        .route("/v1/metrics", post(metrics::create_metric))
        .route("/v1/metrics/record", post(metrics::record_metric))
        .route(
            "/v1/metrics/{metric_name}",
            get(metrics::get_metric).delete(metrics::delete_metric),
        )
        .route(
            "/v1/metrics/{metric_name}/status",
            get(metrics::metric_status),
        )
        .route("/v1/plan-limits/changed", post(plans::plan_limits_changed))
        .route("/v1/billing/reset", post(billing::reset_billing_cycle))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.auth),
            require_caller,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .with_state(state)
        .layer(middleware::from_fn(trace_context::propagate_trace_context))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
