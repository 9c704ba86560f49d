use axum::Json;
use axum::extract::State;

use super::AppState;
use super::schemas::{HealthResponse, MetricsResponse};

fn metrics_response(state: &AppState) -> MetricsResponse {
    MetricsResponse {
        engine: state.engine.metrics().snapshot(),
        gateway: state.gateway.metrics().snapshot(),
    }
}

/// `GET /health` -- service status together with a counter snapshot.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        metrics: metrics_response(&state),
    })
}

/// `GET /metrics` -- engine and gateway counters as JSON.
pub async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(metrics_response(&state))
}
