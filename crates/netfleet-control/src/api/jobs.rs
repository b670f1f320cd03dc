//! Job endpoints.
//!
//! POST /jobs                   submit a job (202)
//! GET  /jobs/{job_id}          job status and result
//! GET  /jobs/{job_id}/events   ordered event log

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use netfleet_common::models::{Job, JobEvent};
use netfleet_common::signing::HEADER_IDEMPOTENCY_KEY;

use crate::api::auth_extractor::Caller;
use crate::api::error::ApiError;
use crate::api::Envelope;
use crate::state::AppState;

// ── Submit ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
}

pub async fn submit_job(
    State(state): State<AppState>,
    Caller(caller): Caller,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Envelope<SubmitJobResponse>>), ApiError> {
    let idempotency_key = headers
        .get(HEADER_IDEMPOTENCY_KEY)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if state.require_idempotency() && idempotency_key.is_none() {
        return Err(ApiError::bad_request("Missing Idempotency-Key"));
    }

    let request: SubmitJobRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("Malformed payload: {e}")))?;

    let submission = state.orchestrator().submit(
        &caller,
        &request.action,
        request.payload,
        idempotency_key,
    )?;

    Ok((
        StatusCode::ACCEPTED,
        Json(Envelope::accepted(SubmitJobResponse {
            job_id: submission.job_id,
        })),
    ))
}

// ── Status ──────────────────────────────────────────────────────────

pub async fn get_job(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(job_id): Path<String>,
) -> Result<Json<Envelope<Job>>, ApiError> {
    state
        .orchestrator()
        .get_job(&job_id, &caller)
        .map(|job| Json(Envelope::ok(job)))
        .ok_or_else(|| ApiError::not_found("Job not found"))
}

#[derive(Debug, Serialize)]
pub struct JobEvents {
    pub job_id: String,
    pub events: Vec<JobEvent>,
}

pub async fn get_events(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(job_id): Path<String>,
) -> Result<Json<Envelope<JobEvents>>, ApiError> {
    let events = state
        .orchestrator()
        .get_events(&job_id, &caller)
        .ok_or_else(|| ApiError::not_found("Job not found"))?;
    Ok(Json(Envelope::ok(JobEvents { job_id, events })))
}
