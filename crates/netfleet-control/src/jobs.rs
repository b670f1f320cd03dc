//! Job orchestration.
//!
//! `submit` validates, deduplicates and records a job synchronously, then
//! hands the device work to the blocking pool. From there the execution
//! task is the only writer of the job: it moves it to `running`, appends
//! events while the worker reports progress and sets the terminal state
//! exactly once. Pollers only read.

use std::sync::Arc;

use dashmap::DashMap;
use netfleet_common::clock::Clock;
use netfleet_common::ids;
use netfleet_common::models::{
    DeviceCheckResult, EventLevel, Job, JobEvent, JobStatus, NormalizedResult, ResultStatus,
};
use netfleet_engine::{DeviceWorker, EventSink, PolicyViolation, ValidationError};
use serde_json::Value;
use thiserror::Error;

use crate::auth::Principal;
use crate::idempotency::{IdempotencyStore, Reservation};

/// Role allowed to read every caller's jobs.
pub const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    #[error(transparent)]
    Policy(#[from] PolicyViolation),
    #[error("Idempotent request in progress, retry")]
    InProgress,
}

impl From<ValidationError> for SubmitError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::Policy(violation) => SubmitError::Policy(violation),
            other => SubmitError::MalformedPayload(other.to_string()),
        }
    }
}

/// Outcome of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub job_id: String,
    /// `false` when an earlier submission with the same idempotency key
    /// already produced the job.
    pub created: bool,
}

struct JobEntry {
    job: Job,
    events: Vec<JobEvent>,
    owner: String,
}

pub struct JobOrchestrator {
    jobs: DashMap<String, JobEntry>,
    idempotency: IdempotencyStore,
    worker: Arc<DeviceWorker>,
    clock: Arc<dyn Clock>,
}

impl JobOrchestrator {
    pub fn new(
        worker: Arc<DeviceWorker>,
        idempotency: IdempotencyStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            jobs: DashMap::new(),
            idempotency,
            worker,
            clock,
        }
    }

    pub fn idempotency(&self) -> &IdempotencyStore {
        &self.idempotency
    }

    /// Accept a job for asynchronous execution.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(
        self: &Arc<Self>,
        caller: &Principal,
        action: &str,
        payload: Value,
        idempotency_key: Option<&str>,
    ) -> Result<Submission, SubmitError> {
        // Validate first so a rejected payload never holds a reservation.
        let device_ip = self.worker.validate(action, &payload)?;

        if let Some(key) = idempotency_key {
            match self.idempotency.reserve_or_return(&caller.api_key, key) {
                Reservation::Fresh => {}
                Reservation::Existing(job_id) => {
                    tracing::info!(%job_id, "idempotent replay; returning existing job");
                    return Ok(Submission {
                        job_id,
                        created: false,
                    });
                }
                Reservation::InFlight => return Err(SubmitError::InProgress),
            }
        }

        let now = self.clock.now();
        let job = Job {
            id: ids::job_id(),
            action: action.to_string(),
            payload,
            status: JobStatus::Accepted,
            result: None,
            created_at: now,
            updated_at: now,
        };
        let job_id = job.id.clone();
        let payload = job.payload.clone();
        self.jobs.insert(
            job_id.clone(),
            JobEntry {
                job,
                events: vec![JobEvent {
                    ts: now,
                    level: EventLevel::Info,
                    message: format!("job accepted: {action} on {device_ip}"),
                }],
                owner: caller.api_key.clone(),
            },
        );
        if let Some(key) = idempotency_key {
            self.idempotency.bind(&caller.api_key, key, &job_id);
        }

        tracing::info!(%job_id, action, %device_ip, "job accepted");
        self.schedule(job_id.clone(), action.to_string(), payload);

        Ok(Submission {
            job_id,
            created: true,
        })
    }

    fn schedule(self: &Arc<Self>, job_id: String, action: String, payload: Value) {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let sink = JobEventSink {
                orchestrator: Arc::clone(&orchestrator),
                job_id: job_id.clone(),
            };
            let outcome = tokio::task::spawn_blocking(move || {
                sink.orchestrator.mark_running(&sink.job_id);
                sink.orchestrator.worker.execute(&action, &payload, &sink)
            })
            .await;

            match outcome {
                Ok(result) => orchestrator.finish(&job_id, result),
                Err(e) => {
                    tracing::error!(%job_id, error = %e, "job execution aborted");
                    orchestrator.abort(&job_id, format!("execution aborted: {e}"));
                }
            }
        });
    }

    /// Job as seen by `caller`. Jobs of other callers are invisible unless
    /// the caller holds the admin role.
    pub fn get_job(&self, job_id: &str, caller: &Principal) -> Option<Job> {
        let entry = self.jobs.get(job_id)?;
        visible_to(&entry, caller).then(|| entry.job.clone())
    }

    /// Events of a job in insertion order.
    pub fn get_events(&self, job_id: &str, caller: &Principal) -> Option<Vec<JobEvent>> {
        let entry = self.jobs.get(job_id)?;
        visible_to(&entry, caller).then(|| entry.events.clone())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn append_event(&self, job_id: &str, level: EventLevel, message: String) {
        let ts = self.clock.now();
        if let Some(mut entry) = self.jobs.get_mut(job_id) {
            entry.events.push(JobEvent { ts, level, message });
        }
    }

    fn mark_running(&self, job_id: &str) {
        let now = self.clock.now();
        let Some(mut entry) = self.jobs.get_mut(job_id) else {
            return;
        };
        if !entry.job.status.can_transition_to(JobStatus::Running) {
            tracing::warn!(job_id, status = %entry.job.status, "job cannot start from this state");
            return;
        }
        entry.job.status = JobStatus::Running;
        entry.job.updated_at = now;
        entry.events.push(JobEvent {
            ts: now,
            level: EventLevel::Info,
            message: "job running".into(),
        });
        tracing::debug!(job_id, "job running");
    }

    /// Record the terminal state. A job that is already terminal is left
    /// untouched.
    fn finish(&self, job_id: &str, result: NormalizedResult) {
        let now = self.clock.now();
        let Some(mut entry) = self.jobs.get_mut(job_id) else {
            return;
        };
        if entry.job.status.is_terminal() {
            tracing::warn!(
                job_id,
                status = %entry.job.status,
                "job already terminal; ignoring result"
            );
            return;
        }
        if entry.job.status == JobStatus::Accepted {
            entry.job.status = JobStatus::Running;
        }

        let status = result.status.job_status();
        entry.job.status = status;
        entry.job.result = Some(result);
        entry.job.updated_at = now;
        tracing::info!(job_id, %status, "job finished");
    }

    /// Fail a job whose execution task died before producing a result.
    fn abort(&self, job_id: &str, reason: String) {
        let device_ip = match self.jobs.get(job_id) {
            Some(entry) if !entry.job.status.is_terminal() => entry
                .job
                .payload
                .get("device_ip")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_default(),
            _ => return,
        };

        let mut result = self
            .worker
            .signatures()
            .normalize(&DeviceCheckResult::new(device_ip).failed(reason.clone()));
        result.status = ResultStatus::Error;
        result.success = false;

        self.append_event(job_id, EventLevel::Error, reason);
        self.finish(job_id, result);
    }
}

fn visible_to(entry: &JobEntry, caller: &Principal) -> bool {
    entry.owner == caller.api_key || caller.has_role(ADMIN_ROLE)
}

/// Forwards worker progress into the job's event log.
struct JobEventSink {
    orchestrator: Arc<JobOrchestrator>,
    job_id: String,
}

impl EventSink for JobEventSink {
    fn emit(&self, level: EventLevel, message: String) {
        tracing::debug!(job_id = %self.job_id, ?level, %message, "job event");
        self.orchestrator.append_event(&self.job_id, level, message);
    }
}
