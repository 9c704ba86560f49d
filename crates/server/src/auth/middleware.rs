use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use super::Authenticator;
use crate::error::ServerError;

/// Authenticate the request and attach the resulting
/// [`CallerIdentity`](tracktags_gateway::CallerIdentity) as a request
/// extension. Rejects with 401 otherwise.
pub async fn require_caller(
    State(auth): State<Arc<Authenticator>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let caller = auth.authenticate(request.headers()).await?;
    request.extensions_mut().insert(caller);
    Ok(next.run(request).await)
}
