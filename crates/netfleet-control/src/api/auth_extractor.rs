//! Authentication middleware and the authenticated-caller extractor.

use axum::body::{self, Body};
use axum::extract::{FromRequestParts, OriginalUri, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;

use crate::api::error::ApiError;
use crate::auth::{AuthRequest, Principal};
use crate::state::AppState;

/// Authenticate every request on the layered routes.
///
/// The body is buffered because the signature covers it; handlers receive
/// it unchanged. The signed path is the full path, including any prefix
/// the router was nested under.
pub async fn require_auth(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (mut parts, body) = request.into_parts();
    let bytes = body::to_bytes(body, state.max_body_bytes())
        .await
        .map_err(|_| ApiError::payload_too_large("Request body too large"))?;

    let principal = state
        .gate()
        .authenticate(&AuthRequest {
            method: parts.method.as_str(),
            path: uri.path(),
            headers: &parts.headers,
            body: &bytes,
        })
        .map_err(|e| {
            tracing::warn!(
                reason = e.category(),
                method = %parts.method,
                path = uri.path(),
                "request rejected"
            );
            ApiError::from(e)
        })?;

    tracing::debug!(key_id = ?principal.key_id, "request authenticated");
    parts.extensions.insert(principal);
    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}

/// The caller established by [`require_auth`].
pub struct Caller(pub Principal);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .map(Caller)
            .ok_or_else(|| ApiError::unauthorized("Missing API key"))
    }
}
