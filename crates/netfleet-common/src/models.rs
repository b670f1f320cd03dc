//! Data models for the netfleet platform.
//!
//! Jobs and their events are owned by the control plane; device check
//! results are produced by the execution engine and folded into the job
//! once it reaches a terminal state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Job ─────────────────────────────────────────────────────────────

/// Lifecycle state of a job.
///
/// `accepted → running → {succeeded | failed | pending_verify}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Accepted,
    Running,
    Succeeded,
    Failed,
    PendingVerify,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::PendingVerify
        )
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match self {
            JobStatus::Accepted => next == JobStatus::Running,
            JobStatus::Running => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Accepted => "accepted",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::PendingVerify => "pending_verify",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accepted" => Ok(JobStatus::Accepted),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            "pending_verify" => Ok(JobStatus::PendingVerify),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A unit of device work submitted through the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "job_id")]
    pub id: String,
    pub action: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    /// Normalized device result, present once the job is terminal.
    pub result: Option<NormalizedResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

/// One entry of a job's append-only event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub ts: DateTime<Utc>,
    pub level: EventLevel,
    pub message: String,
}

// ── Device results ──────────────────────────────────────────────────

/// Outcome of a single read-only precondition check.
///
/// A failed check is a value, never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecheckOutcome {
    pub passed: bool,
    pub detail: String,
}

impl PrecheckOutcome {
    pub fn pass(detail: impl Into<String>) -> Self {
        Self {
            passed: true,
            detail: detail.into(),
        }
    }

    pub fn fail(detail: impl Into<String>) -> Self {
        Self {
            passed: false,
            detail: detail.into(),
        }
    }
}

/// Raw per-device outcome of one worker run, before classification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceCheckResult {
    pub device_ip: String,
    pub success: bool,
    /// Status string as reported by the device or transport, if any.
    #[serde(default)]
    pub raw_status: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub firmware_version_before: Option<String>,
    #[serde(default)]
    pub firmware_version_after: Option<String>,
    #[serde(default)]
    pub firmware_final: Option<bool>,
    #[serde(default)]
    pub subnet_ok: Option<bool>,
    #[serde(default)]
    pub license_ok: Option<bool>,
    #[serde(default)]
    pub stp_ok: Option<bool>,
    /// Every precheck that ran, keyed by check name.
    #[serde(default)]
    pub prechecks: BTreeMap<String, PrecheckOutcome>,
}

impl DeviceCheckResult {
    pub fn new(device_ip: impl Into<String>) -> Self {
        Self {
            device_ip: device_ip.into(),
            ..Default::default()
        }
    }

    /// Mark the run failed with the given error text.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    pub fn succeeded(mut self) -> Self {
        self.success = true;
        self.error = None;
        self
    }
}

/// Derived status of a device run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Succeeded,
    PendingVerify,
    Error,
}

impl ResultStatus {
    /// Terminal job status carrying this result.
    pub fn job_status(self) -> JobStatus {
        match self {
            ResultStatus::Succeeded => JobStatus::Succeeded,
            ResultStatus::PendingVerify => JobStatus::PendingVerify,
            ResultStatus::Error => JobStatus::Failed,
        }
    }
}

/// Device result after classification, as reported downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResult {
    pub device_ip: String,
    pub status: ResultStatus,
    /// `true` unless `status` is `error`.
    pub success: bool,
    pub raw_status: Option<String>,
    pub error: Option<String>,
    pub firmware_version_before: Option<String>,
    pub firmware_version_after: Option<String>,
    pub firmware_final: Option<bool>,
    pub subnet_ok: Option<bool>,
    pub license_ok: Option<bool>,
    pub stp_ok: Option<bool>,
    pub prechecks: BTreeMap<String, PrecheckOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_machine_only_moves_forward() {
        use JobStatus::*;
        assert!(Accepted.can_transition_to(Running));
        assert!(!Accepted.can_transition_to(Succeeded));
        assert!(Running.can_transition_to(Succeeded));
        assert!(Running.can_transition_to(Failed));
        assert!(Running.can_transition_to(PendingVerify));
        assert!(!Running.can_transition_to(Accepted));
        assert!(!Succeeded.can_transition_to(Failed));
        assert!(!PendingVerify.can_transition_to(Running));
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&JobStatus::PendingVerify).unwrap();
        assert_eq!(json, "\"pending_verify\"");
        assert_eq!(
            "pending_verify".parse::<JobStatus>().unwrap(),
            JobStatus::PendingVerify
        );
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn event_has_exactly_ts_level_message() {
        let event = JobEvent {
            ts: Utc::now(),
            level: EventLevel::Warn,
            message: "device rebooting".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["level", "message", "ts"]);
        assert_eq!(value["level"], "warn");
    }

    #[test]
    fn job_serializes_id_as_job_id() {
        let now = Utc::now();
        let job = Job {
            id: "job_1".into(),
            action: "radio.precheck".into(),
            payload: serde_json::json!({"device_ip": "10.0.0.1"}),
            status: JobStatus::Accepted,
            result: None,
            created_at: now,
            updated_at: now,
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["job_id"], "job_1");
        assert_eq!(value["status"], "accepted");
        assert!(value["result"].is_null());
    }

    #[test]
    fn result_status_maps_error_to_failed_job() {
        assert_eq!(ResultStatus::Error.job_status(), JobStatus::Failed);
        assert_eq!(
            ResultStatus::PendingVerify.job_status(),
            JobStatus::PendingVerify
        );
        assert_eq!(ResultStatus::Succeeded.job_status(), JobStatus::Succeeded);
    }
}
