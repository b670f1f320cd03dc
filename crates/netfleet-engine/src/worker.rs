//! Device worker: runs one action against one device and classifies it.
//!
//! [`DeviceWorker::execute`] never fails. Every connection, command and
//! validation error is captured into the [`DeviceCheckResult`] and then
//! classified, so the caller always has a terminal status to record.

use std::sync::Arc;

use netfleet_common::models::{DeviceCheckResult, EventLevel, NormalizedResult, ResultStatus};

use crate::classify::TransientSignatures;
use crate::handlers::{
    ActionContext, HandlerRegistry, HandlerSettings, PreparedAction, ValidationError,
};
use crate::locks::DeviceLocks;
use crate::session::SessionConnector;

/// Receives the progress events of a running action.
pub trait EventSink: Send + Sync {
    fn emit(&self, level: EventLevel, message: String);
}

pub struct DeviceWorker {
    registry: HandlerRegistry,
    connector: Arc<dyn SessionConnector>,
    locks: DeviceLocks,
    signatures: TransientSignatures,
    settings: HandlerSettings,
}

impl DeviceWorker {
    pub fn new(
        registry: HandlerRegistry,
        connector: Arc<dyn SessionConnector>,
        signatures: TransientSignatures,
        settings: HandlerSettings,
    ) -> Self {
        Self {
            registry,
            connector,
            locks: DeviceLocks::new(),
            signatures,
            settings,
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn signatures(&self) -> &TransientSignatures {
        &self.signatures
    }

    pub fn locks(&self) -> &DeviceLocks {
        &self.locks
    }

    /// Static validation only; used at submission time. Returns the target
    /// device address.
    pub fn validate(
        &self,
        action: &str,
        payload: &serde_json::Value,
    ) -> Result<String, ValidationError> {
        let prepared = self.registry.prepare(action, payload, &self.settings)?;
        Ok(prepared.device_ip().to_string())
    }

    /// Run the action, classify the outcome and report the terminal event.
    pub fn execute(
        &self,
        action: &str,
        payload: &serde_json::Value,
        sink: &dyn EventSink,
    ) -> NormalizedResult {
        let raw = self.run(action, payload, sink);
        let normalized = self.signatures.normalize(&raw);
        let error = normalized.error.as_deref().unwrap_or("unknown error");

        match normalized.status {
            ResultStatus::Succeeded => {
                tracing::info!(
                    action,
                    device_ip = %normalized.device_ip,
                    "device action succeeded"
                );
                sink.emit(
                    EventLevel::Info,
                    format!("{action} succeeded on {}", normalized.device_ip),
                );
            }
            ResultStatus::PendingVerify => {
                tracing::info!(
                    action,
                    device_ip = %normalized.device_ip,
                    error,
                    "device dropped mid-action; pending verification"
                );
                sink.emit(
                    EventLevel::Warn,
                    format!(
                        "{} stopped responding ({error}); result pending verification",
                        normalized.device_ip
                    ),
                );
            }
            ResultStatus::Error => {
                tracing::error!(
                    action,
                    device_ip = %normalized.device_ip,
                    error,
                    "device action failed"
                );
                sink.emit(
                    EventLevel::Error,
                    format!("{action} failed on {}: {error}", normalized.device_ip),
                );
            }
        }
        normalized
    }

    /// Run the action and return the raw, unclassified result.
    pub fn run(
        &self,
        action: &str,
        payload: &serde_json::Value,
        sink: &dyn EventSink,
    ) -> DeviceCheckResult {
        let prepared = match self.registry.prepare(action, payload, &self.settings) {
            Ok(prepared) => prepared,
            Err(e) => {
                let device_ip = payload
                    .get("device_ip")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                return DeviceCheckResult::new(device_ip).failed(e.to_string());
            }
        };
        let device_ip = prepared.device_ip().to_string();

        let _guard = if prepared.is_mutating() {
            if self.locks.is_locked(&device_ip) {
                sink.emit(
                    EventLevel::Info,
                    format!("waiting for another action on {device_ip} to finish"),
                );
            }
            Some(self.locks.acquire(&device_ip))
        } else {
            None
        };

        self.run_prepared(prepared.as_ref(), sink)
    }

    fn run_prepared(
        &self,
        prepared: &dyn PreparedAction,
        sink: &dyn EventSink,
    ) -> DeviceCheckResult {
        let device_ip = prepared.device_ip();
        let mut result = DeviceCheckResult::new(device_ip);

        sink.emit(EventLevel::Info, format!("connecting to {device_ip}"));
        let mut session = match self.connector.connect(device_ip) {
            Ok(session) => session,
            Err(e) => return result.failed(e.to_string()),
        };

        let mut ctx = ActionContext {
            session: session.as_mut(),
            settings: &self.settings,
            events: sink,
        };

        if let Err(e) = prepared.precheck(&mut ctx, &mut result) {
            return result.failed(e.to_string());
        }
        let failed: Vec<String> = result
            .prechecks
            .iter()
            .filter(|(_, outcome)| !outcome.passed)
            .map(|(name, outcome)| format!("{name}: {}", outcome.detail))
            .collect();
        if !failed.is_empty() {
            return result.failed(format!("precheck failed ({})", failed.join("; ")));
        }

        if let Err(e) = prepared.apply(&mut ctx, &mut result) {
            return result.failed(e.to_string());
        }
        match result.error.take() {
            Some(error) => result.failed(error),
            None => result.succeeded(),
        }
    }
}
