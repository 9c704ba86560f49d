use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};

use tracktags_gateway::{CallerIdentity, ProxyOutcome, ProxyRequest};

use super::AppState;
use crate::error::ServerError;

/// `POST /proxy` -- check the caller's limits and forward the call when
/// admitted.
///
/// Admitted calls answer 200 with the upstream response wrapped in the
/// body. Denied calls answer 429 with the breach status and, for metrics
/// that reset, a `Retry-After` header.
pub async fn proxy(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    headers: HeaderMap,
    payload: Result<Json<ProxyRequest>, JsonRejection>,
) -> Result<Response, ServerError> {
    let Json(request) = payload?;
    let outcome = state
        .gateway
        .check_and_forward(&caller, request, &headers)
        .await?;

    let status = if outcome.is_allowed() {
        StatusCode::OK
    } else {
        StatusCode::TOO_MANY_REQUESTS
    };
    let retry_after = match &outcome {
        ProxyOutcome::Denied {
            retry_after: Some(seconds),
            ..
        } => Some(*seconds),
        _ => None,
    };

    let mut response = (status, Json(outcome)).into_response();
    if let Some(seconds) = retry_after {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, seconds.into());
    }
    Ok(response)
}
