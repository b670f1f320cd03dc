//! REST API route tree.

pub mod auth_extractor;
pub mod error;
pub mod jobs;
pub mod whoami;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Prefix every job endpoint is served under.
pub const NAMESPACE: &str = "/jobs-namespace";

/// Success body: `{"status": ..., "data": ...}`.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub status: &'static str,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self { status: "ok", data }
    }

    pub fn accepted(data: T) -> Self {
        Self {
            status: "accepted",
            data,
        }
    }
}

/// Build the authenticated job router.
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/whoami", get(whoami::whoami))
        .route("/jobs", post(jobs::submit_job))
        .route("/jobs/{job_id}", get(jobs::get_job))
        .route("/jobs/{job_id}/events", get(jobs::get_events))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth_extractor::require_auth,
        ))
}

/// The full application: job router, health probe and HTTP layers.
pub fn app(state: AppState) -> Router {
    let body_limit = state.max_body_bytes();
    Router::new()
        .nest(NAMESPACE, router(state.clone()))
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
