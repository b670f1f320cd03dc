//! Action registry.
//!
//! Each action key (`radio.firmware_upgrade`, `switch.precheck`, ...) maps
//! to a [`DeviceHandler`]. The registry is built once at startup; a new
//! device family is a new handler registration.

pub mod radio;
pub mod switch;

use std::collections::HashMap;
use std::net::IpAddr;

use netfleet_common::models::{DeviceCheckResult, EventLevel, PrecheckOutcome};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::precheck;
use crate::session::{DeviceSession, SessionError};
use crate::worker::EventSink;

// ── Errors ──────────────────────────────────────────────────────────

/// A static domain rule the payload breaks. The caller can fix and resubmit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("policy violation: {reason}")]
pub struct PolicyViolation {
    pub reason: String,
}

impl PolicyViolation {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error(transparent)]
    Policy(#[from] PolicyViolation),
}

// ── Settings ────────────────────────────────────────────────────────

/// Fleet-wide expectations the handlers check devices against.
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    /// Dotted-decimal mask every managed interface must carry.
    pub expected_subnet_mask: String,
    pub expect_stp_enabled: bool,
    /// Highest front-panel port number on managed switches.
    pub switch_port_count: u16,
    /// Ports that no payload may assign to a feature.
    pub reserved_switch_ports: Vec<u16>,
    /// Bundle codes that count as a paid license.
    pub paid_license_bundles: Vec<String>,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            expected_subnet_mask: "255.255.255.248".into(),
            expect_stp_enabled: true,
            switch_port_count: 52,
            reserved_switch_ports: Vec::new(),
            paid_license_bundles: precheck::DEFAULT_PAID_LICENSE_BUNDLES
                .iter()
                .map(|code| code.to_string())
                .collect(),
        }
    }
}

// ── Handler traits ──────────────────────────────────────────────────

/// Everything an action may touch while it runs.
pub struct ActionContext<'a> {
    pub session: &'a mut dyn DeviceSession,
    pub settings: &'a HandlerSettings,
    pub events: &'a dyn EventSink,
}

impl ActionContext<'_> {
    /// Send a command and fail if the device answers with a rejection line.
    pub fn run(&mut self, command: &str) -> Result<String, SessionError> {
        tracing::debug!(command, "sending device command");
        let output = self.session.send_command(command)?;
        if let Some(line) = rejection_line(&output) {
            return Err(SessionError::Rejected(format!("{command}: {line}")));
        }
        Ok(output)
    }

    pub fn info(&self, message: String) {
        self.events.emit(EventLevel::Info, message);
    }

    pub fn warn(&self, message: String) {
        self.events.emit(EventLevel::Warn, message);
    }

    /// Store a precheck outcome on the result and report it.
    pub fn record_precheck(
        &self,
        result: &mut DeviceCheckResult,
        name: &str,
        outcome: PrecheckOutcome,
    ) {
        match name {
            precheck::SUBNET_MASK => result.subnet_ok = Some(outcome.passed),
            precheck::LICENSE => result.license_ok = Some(outcome.passed),
            precheck::STP => result.stp_ok = Some(outcome.passed),
            _ => {}
        }
        if outcome.passed {
            self.info(format!("precheck {name} passed: {}", outcome.detail));
        } else {
            self.warn(format!("precheck {name} failed: {}", outcome.detail));
        }
        result.prechecks.insert(name.to_string(), outcome);
    }
}

/// Registered entry point for one action key.
pub trait DeviceHandler: Send + Sync {
    fn action(&self) -> &'static str;

    /// Parse and statically validate a payload. No device I/O.
    fn prepare(
        &self,
        payload: &serde_json::Value,
        settings: &HandlerSettings,
    ) -> Result<Box<dyn PreparedAction>, ValidationError>;
}

/// A validated action bound to one device.
pub trait PreparedAction: Send {
    fn device_ip(&self) -> &str;

    /// Mutating actions hold the per-device lock for their whole run.
    fn is_mutating(&self) -> bool;

    /// Read-only checks. Failed checks go on `result`; only transport
    /// failures are errors.
    fn precheck(
        &self,
        _ctx: &mut ActionContext<'_>,
        _result: &mut DeviceCheckResult,
    ) -> Result<(), SessionError> {
        Ok(())
    }

    /// Perform the action. Leaving `result.error` unset means success.
    fn apply(
        &self,
        ctx: &mut ActionContext<'_>,
        result: &mut DeviceCheckResult,
    ) -> Result<(), SessionError>;
}

// ── Registry ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Box<dyn DeviceHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in device family.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(radio::RadioPrecheck);
        registry.register(radio::RadioFirmwareUpgrade);
        registry.register(radio::RadioVerify);
        registry.register(switch::SwitchPrecheck);
        registry.register(switch::SwitchPortConfig);
        registry
    }

    pub fn register(&mut self, handler: impl DeviceHandler + 'static) {
        let action = handler.action();
        if self.handlers.insert(action, Box::new(handler)).is_some() {
            tracing::warn!(action, "device handler replaced");
        }
    }

    pub fn get(&self, action: &str) -> Option<&dyn DeviceHandler> {
        self.handlers.get(action).map(|h| h.as_ref())
    }

    /// Registered action keys, sorted.
    pub fn actions(&self) -> Vec<&'static str> {
        let mut actions: Vec<_> = self.handlers.keys().copied().collect();
        actions.sort_unstable();
        actions
    }

    pub fn prepare(
        &self,
        action: &str,
        payload: &serde_json::Value,
        settings: &HandlerSettings,
    ) -> Result<Box<dyn PreparedAction>, ValidationError> {
        let handler = self
            .get(action)
            .ok_or_else(|| ValidationError::UnknownAction(action.to_string()))?;
        handler.prepare(payload, settings)
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Deserialize a payload into a handler's typed form.
pub fn parse_payload<T: DeserializeOwned>(
    payload: &serde_json::Value,
) -> Result<T, ValidationError> {
    serde_json::from_value(payload.clone()).map_err(|e| ValidationError::Malformed(e.to_string()))
}

pub fn validate_device_ip(device_ip: &str) -> Result<String, ValidationError> {
    let trimmed = device_ip.trim();
    trimmed
        .parse::<IpAddr>()
        .map(|ip| ip.to_string())
        .map_err(|_| {
            ValidationError::Malformed(format!("device_ip {trimmed:?} is not an IP address"))
        })
}

/// First line of device output that signals a rejected command.
fn rejection_line(output: &str) -> Option<&str> {
    output.lines().map(str::trim).find(|line| {
        line.starts_with('%')
            || line.to_ascii_lowercase().starts_with("error:")
            || line.to_ascii_lowercase().starts_with("invalid command")
    })
}

/// Value of a `Status: ...` line in device output.
pub fn status_line(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim().eq_ignore_ascii_case("status") {
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_string())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_all_families() {
        let registry = HandlerRegistry::with_defaults();
        assert_eq!(
            registry.actions(),
            vec![
                "radio.firmware_upgrade",
                "radio.precheck",
                "radio.verify",
                "switch.port_config",
                "switch.precheck",
            ]
        );
    }

    #[test]
    fn unknown_action_is_rejected() {
        let registry = HandlerRegistry::with_defaults();
        let err = registry
            .prepare(
                "ups.selftest",
                &serde_json::json!({"device_ip": "10.0.0.1"}),
                &HandlerSettings::default(),
            )
            .err()
            .unwrap();
        assert!(matches!(err, ValidationError::UnknownAction(_)));
        assert_eq!(err.to_string(), "unknown action: ups.selftest");
    }

    #[test]
    fn device_ip_must_parse() {
        assert_eq!(validate_device_ip(" 10.0.0.1 ").unwrap(), "10.0.0.1");
        assert!(validate_device_ip("router-1").is_err());
    }

    #[test]
    fn rejection_lines_are_detected() {
        assert_eq!(
            rejection_line("ok\n% Invalid input detected\n"),
            Some("% Invalid input detected")
        );
        assert_eq!(rejection_line("Error: bad image"), Some("Error: bad image"));
        assert_eq!(rejection_line("copy complete"), None);
    }

    #[test]
    fn status_line_is_extracted() {
        assert_eq!(status_line("Image: b\nStatus: activating\n").as_deref(), Some("activating"));
        assert_eq!(status_line("Status:\n"), None);
        assert_eq!(status_line("nothing here"), None);
    }

    #[test]
    fn policy_violation_message_names_policy() {
        let err = ValidationError::from(PolicyViolation::new("port 1 is reserved"));
        assert_eq!(err.to_string(), "policy violation: port 1 is reserved");
    }
}
