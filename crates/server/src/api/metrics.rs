//! Metric provisioning and management.
//!
//! `POST /v1/metrics` is the only way a metric unit comes into existence;
//! the proxy refuses to check metrics that were never created here.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::info;

use tracktags_core::{BreachStatus, MetricName};
use tracktags_engine::MetricSnapshot;
use tracktags_gateway::CallerIdentity;

use super::AppState;
use super::schemas::{CreateMetricRequest, RecordAccepted, RecordMetricRequest, ScopeParams};
use crate::error::ServerError;

/// `POST /v1/metrics` -- ensure a metric unit exists. Creating an existing
/// metric returns it unchanged.
pub async fn create_metric(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    payload: Result<Json<CreateMetricRequest>, JsonRejection>,
) -> Result<Json<MetricSnapshot>, ServerError> {
    let Json(request) = payload?;
    let scope = request.scope.resolve(&caller.business_id)?;
    let metric_name = request.spec.metric_name.clone();
    let unit = state
        .engine
        .ensure_metric(&scope, request.spec, caller.key_id.clone())
        .await?;
    info!(%scope, metric = %metric_name, key = unit.key(), "metric provisioned");
    let snapshot = unit.snapshot(state.engine.ask_timeout()).await?;
    Ok(Json(snapshot))
}

/// `POST /v1/metrics/record` -- add a value to an existing metric. The
/// record is applied asynchronously.
pub async fn record_metric(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    payload: Result<Json<RecordMetricRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ServerError> {
    let Json(request) = payload?;
    if !request.value.is_finite() {
        return Err(ServerError::BadRequest("value must be a finite number".into()));
    }
    let scope = request.scope.resolve(&caller.business_id)?;
    state.engine.record(
        &scope,
        &request.metric_name,
        request.value,
        request.tags,
        request.metadata,
    )?;
    Ok((
        StatusCode::ACCEPTED,
        Json(RecordAccepted {
            status: "accepted",
            metric_name: request.metric_name,
        }),
    ))
}

/// `GET /v1/metrics/{metric_name}` -- full unit state.
pub async fn get_metric(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(metric_name): Path<String>,
    params: Result<Query<ScopeParams>, QueryRejection>,
) -> Result<Json<MetricSnapshot>, ServerError> {
    let Query(params) = params?;
    let scope = params.resolve(&caller.business_id)?;
    let metric_name = MetricName::new(metric_name);
    let snapshot = state.engine.snapshot(&scope, &metric_name).await?;
    Ok(Json(snapshot))
}

/// `GET /v1/metrics/{metric_name}/status` -- current limit status.
pub async fn metric_status(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(metric_name): Path<String>,
    params: Result<Query<ScopeParams>, QueryRejection>,
) -> Result<Json<BreachStatus>, ServerError> {
    let Query(params) = params?;
    let scope = params.resolve(&caller.business_id)?;
    let metric_name = MetricName::new(metric_name);
    let status = state.engine.limit_status(&scope, &metric_name, None).await?;
    Ok(Json(status))
}

/// `DELETE /v1/metrics/{metric_name}` -- stop the unit.
pub async fn delete_metric(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(metric_name): Path<String>,
    params: Result<Query<ScopeParams>, QueryRejection>,
) -> Result<StatusCode, ServerError> {
    let Query(params) = params?;
    let scope = params.resolve(&caller.business_id)?;
    let metric_name = MetricName::new(metric_name);
    if state.engine.shutdown_metric(&scope, &metric_name) {
        info!(%scope, metric = %metric_name, "metric shut down");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ServerError::NotFound(format!(
            "metric '{metric_name}' is not running for {scope}"
        )))
    }
}
