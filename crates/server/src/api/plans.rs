use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, State};
use tracing::info;

use tracktags_gateway::CallerIdentity;

use super::AppState;
use super::schemas::{PlanChangeRequest, PlanChangeResponse};
use crate::error::ServerError;

/// `POST /v1/plan-limits/changed` -- push a durable plan change to the
/// running units of the caller's business, or of one of its customers.
pub async fn plan_limits_changed(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    payload: Result<Json<PlanChangeRequest>, JsonRejection>,
) -> Result<Json<PlanChangeResponse>, ServerError> {
    let Json(request) = payload?;
    if let Some(limits) = &request.limits {
        for limit in limits {
            limit.validate()?;
        }
    }
    let units_updated = state
        .engine
        .notify_plan_change(
            &caller.business_id,
            request.customer_id.as_ref(),
            request.limits,
        )
        .await?;
    info!(
        business_id = %caller.business_id,
        customer_id = ?request.customer_id,
        units_updated,
        "plan limits changed"
    );
    Ok(Json(PlanChangeResponse { units_updated }))
}
