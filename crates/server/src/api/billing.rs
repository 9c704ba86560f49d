use axum::Json;
use axum::extract::{Extension, State};

use tracktags_gateway::CallerIdentity;

use super::AppState;
use super::schemas::BillingResetResponse;
use crate::error::ServerError;

/// `POST /v1/billing/reset` -- billing cycle boundary for the caller's
/// business. Zeroes every `stripe_billing` metric of the business and of
/// its running customers.
pub async fn reset_billing_cycle(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
) -> Result<Json<BillingResetResponse>, ServerError> {
    let units_reset = state
        .engine
        .reset_stripe_metrics(&caller.business_id)
        .await?;
    Ok(Json(BillingResetResponse { units_reset }))
}
