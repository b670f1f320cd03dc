//! Failure classification and result normalization.
//!
//! This is the only place that turns a raw device outcome into a status.
//! A failed command is not automatically a failed job: a device that
//! reboots during firmware activation drops its session, and that drop is
//! expected. Such errors classify as `pending_verify` and are not logged as
//! errors; a later verification pass settles the final state.

use netfleet_common::models::{DeviceCheckResult, NormalizedResult, ResultStatus};

use crate::session::REJECTED_PREFIX;

/// Error fragments (matched case-insensitively) that indicate the device
/// went away mid-command rather than rejecting it.
pub const DEFAULT_TRANSIENT_SIGNATURES: &[&str] = &[
    "socket is closed",
    "unable to connect to port 22",
    "connection reset",
    "connection refused",
    "connection closed",
    "broken pipe",
    "no route to host",
    "timed out",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub status: ResultStatus,
    /// Whether the outcome warrants an error-level log/event.
    pub should_log: bool,
}

/// The set of transient error signatures in force.
#[derive(Debug, Clone)]
pub struct TransientSignatures {
    signatures: Vec<String>,
}

impl Default for TransientSignatures {
    fn default() -> Self {
        Self {
            signatures: DEFAULT_TRANSIENT_SIGNATURES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl TransientSignatures {
    /// Defaults plus operator-supplied signatures.
    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        for sig in extra {
            let sig = sig.as_ref().trim().to_lowercase();
            if !sig.is_empty() && !set.signatures.contains(&sig) {
                set.signatures.push(sig);
            }
        }
        set
    }

    /// A command the device answered with a rejection is never transient,
    /// whatever the rejection text says: the device was up to reply.
    pub fn is_transient(&self, error: &str) -> bool {
        let lower = error.to_lowercase();
        if lower.starts_with(REJECTED_PREFIX) {
            return false;
        }
        self.signatures.iter().any(|sig| lower.contains(sig.as_str()))
    }

    pub fn classify(&self, success: bool, error: Option<&str>) -> Classification {
        if success {
            return Classification {
                status: ResultStatus::Succeeded,
                should_log: false,
            };
        }
        match error {
            Some(text) if self.is_transient(text) => Classification {
                status: ResultStatus::PendingVerify,
                should_log: false,
            },
            _ => Classification {
                status: ResultStatus::Error,
                should_log: true,
            },
        }
    }

    /// Classify a failure by its error text alone.
    pub fn classify_error(&self, error: &str) -> Classification {
        self.classify(false, Some(error))
    }

    /// Derive the reported result from a raw device outcome.
    ///
    /// The device-reported status is kept as `raw_status` and never used as
    /// the status itself.
    pub fn normalize(&self, raw: &DeviceCheckResult) -> NormalizedResult {
        let classification = self.classify(raw.success, raw.error.as_deref());
        NormalizedResult {
            device_ip: raw.device_ip.clone(),
            status: classification.status,
            success: classification.status != ResultStatus::Error,
            raw_status: raw.raw_status.clone(),
            error: raw.error.clone(),
            firmware_version_before: raw.firmware_version_before.clone(),
            firmware_version_after: raw.firmware_version_after.clone(),
            firmware_final: raw.firmware_final,
            subnet_ok: raw.subnet_ok,
            license_ok: raw.license_ok,
            stp_ok: raw.stp_ok,
            prechecks: raw.prechecks.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_closed_is_pending_verify_and_quiet() {
        let c = TransientSignatures::default().classify_error("Socket is closed");
        assert_eq!(c.status, ResultStatus::PendingVerify);
        assert!(!c.should_log);
    }

    #[test]
    fn unknown_error_is_terminal_and_logged() {
        let c = TransientSignatures::default().classify_error("unsupported command sequence");
        assert_eq!(c.status, ResultStatus::Error);
        assert!(c.should_log);
    }

    #[test]
    fn device_rejection_is_terminal_even_with_transient_words() {
        let c = TransientSignatures::default().classify_error(
            "command rejected: copy sw tftp://fw/6.1.0.bin: Error: TFTP connection timed out",
        );
        assert_eq!(c.status, ResultStatus::Error);
        assert!(c.should_log);
        assert!(TransientSignatures::default().is_transient("command timed out after 120s"));
    }

    #[test]
    fn failure_without_error_text_is_terminal() {
        let c = TransientSignatures::default().classify(false, None);
        assert_eq!(c.status, ResultStatus::Error);
    }

    #[test]
    fn success_ignores_error_text() {
        let c = TransientSignatures::default().classify(true, Some("unsupported"));
        assert_eq!(c.status, ResultStatus::Succeeded);
        assert!(!c.should_log);
    }

    #[test]
    fn transient_failure_normalizes_to_non_failure() {
        let raw = DeviceCheckResult {
            device_ip: "10.249.73.67".into(),
            success: false,
            raw_status: None,
            error: Some("Unable to connect to port 22".into()),
            ..Default::default()
        };
        let normalized = TransientSignatures::default().normalize(&raw);
        assert_eq!(normalized.status, ResultStatus::PendingVerify);
        assert!(normalized.success);
        assert_eq!(normalized.raw_status, None);
        assert_eq!(normalized.error.as_deref(), Some("Unable to connect to port 22"));
    }

    #[test]
    fn device_reported_status_is_not_trusted() {
        let raw = DeviceCheckResult {
            device_ip: "10.0.0.2".into(),
            success: false,
            raw_status: Some("ok".into()),
            error: Some("bad firmware image".into()),
            ..Default::default()
        };
        let normalized = TransientSignatures::default().normalize(&raw);
        assert_eq!(normalized.status, ResultStatus::Error);
        assert!(!normalized.success);
        assert_eq!(normalized.raw_status.as_deref(), Some("ok"));
    }

    #[test]
    fn extra_signatures_extend_defaults() {
        let sigs = TransientSignatures::with_extra(["Device Is Rebooting", "  ", "timed out"]);
        assert!(sigs.is_transient("error: device is rebooting now"));
        assert!(sigs.is_transient("operation timed out"));
        assert!(!sigs.is_transient("permission denied"));
    }
}
