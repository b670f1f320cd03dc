//! Backhaul radio actions.
//!
//! - `radio.precheck`: subnet + license checks
//! - `radio.firmware_upgrade`: checks, transfer, activate, confirm version
//! - `radio.verify`: confirm the running firmware is final

use netfleet_common::models::DeviceCheckResult;
use serde::Deserialize;

use super::{
    ActionContext, DeviceHandler, HandlerSettings, PreparedAction, ValidationError,
    parse_payload, status_line, validate_device_ip,
};
use crate::firmware::{FirmwareVersion, MIN_FINAL_VERSION};
use crate::precheck;
use crate::session::SessionError;

const SHOW_IP: &str = "show ip";
const SHOW_LICENSE: &str = "show license";
const SHOW_SW: &str = "show sw";
const ACTIVATE_SW: &str = "run sw accept";

const FIRMWARE_URL_SCHEMES: &[&str] =
    &["http://", "https://", "ftp://", "tftp://", "sftp://", "scp://"];

#[derive(Debug, Deserialize)]
struct RadioPayload {
    device_ip: String,
    #[serde(default)]
    expected_subnet_mask: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpgradePayload {
    device_ip: String,
    firmware_url: String,
    #[serde(default)]
    expected_subnet_mask: Option<String>,
}

/// Target radio plus the mask it must carry.
#[derive(Debug, Clone)]
struct RadioTarget {
    device_ip: String,
    expected_mask: String,
}

impl RadioTarget {
    fn new(
        device_ip: &str,
        mask: Option<String>,
        settings: &HandlerSettings,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            device_ip: validate_device_ip(device_ip)?,
            expected_mask: mask.unwrap_or_else(|| settings.expected_subnet_mask.clone()),
        })
    }

    fn prechecks(
        &self,
        ctx: &mut ActionContext<'_>,
        result: &mut DeviceCheckResult,
    ) -> Result<(), SessionError> {
        let ip_output = ctx.run(SHOW_IP)?;
        let outcome = precheck::check_subnet_mask(&ip_output, &self.expected_mask);
        ctx.record_precheck(result, precheck::SUBNET_MASK, outcome);

        let license_output = ctx.run(SHOW_LICENSE)?;
        let outcome =
            precheck::check_license_bundles(&license_output, &ctx.settings.paid_license_bundles);
        ctx.record_precheck(result, precheck::LICENSE, outcome);
        Ok(())
    }
}

/// Read the running version and record whether it is final.
fn read_version(
    ctx: &mut ActionContext<'_>,
) -> Result<Option<FirmwareVersion>, SessionError> {
    let output = ctx.run(SHOW_SW)?;
    Ok(FirmwareVersion::find_in(&output))
}

// ── radio.precheck ──────────────────────────────────────────────────

pub struct RadioPrecheck;

struct PreparedPrecheck(RadioTarget);

impl DeviceHandler for RadioPrecheck {
    fn action(&self) -> &'static str {
        "radio.precheck"
    }

    fn prepare(
        &self,
        payload: &serde_json::Value,
        settings: &HandlerSettings,
    ) -> Result<Box<dyn PreparedAction>, ValidationError> {
        let p: RadioPayload = parse_payload(payload)?;
        let target = RadioTarget::new(&p.device_ip, p.expected_subnet_mask, settings)?;
        Ok(Box::new(PreparedPrecheck(target)))
    }
}

impl PreparedAction for PreparedPrecheck {
    fn device_ip(&self) -> &str {
        &self.0.device_ip
    }

    fn is_mutating(&self) -> bool {
        false
    }

    fn precheck(
        &self,
        ctx: &mut ActionContext<'_>,
        result: &mut DeviceCheckResult,
    ) -> Result<(), SessionError> {
        self.0.prechecks(ctx, result)
    }

    fn apply(
        &self,
        _ctx: &mut ActionContext<'_>,
        _result: &mut DeviceCheckResult,
    ) -> Result<(), SessionError> {
        Ok(())
    }
}

// ── radio.firmware_upgrade ──────────────────────────────────────────

pub struct RadioFirmwareUpgrade;

struct PreparedUpgrade {
    target: RadioTarget,
    firmware_url: String,
}

impl DeviceHandler for RadioFirmwareUpgrade {
    fn action(&self) -> &'static str {
        "radio.firmware_upgrade"
    }

    fn prepare(
        &self,
        payload: &serde_json::Value,
        settings: &HandlerSettings,
    ) -> Result<Box<dyn PreparedAction>, ValidationError> {
        let p: UpgradePayload = parse_payload(payload)?;
        let target = RadioTarget::new(&p.device_ip, p.expected_subnet_mask, settings)?;
        let firmware_url = p.firmware_url.trim().to_string();
        if !FIRMWARE_URL_SCHEMES
            .iter()
            .any(|scheme| firmware_url.starts_with(scheme))
        {
            return Err(ValidationError::Malformed(format!(
                "firmware_url {firmware_url:?} must be an http, ftp, tftp, sftp or scp URL"
            )));
        }
        if firmware_url.chars().any(char::is_whitespace) {
            return Err(ValidationError::Malformed(
                "firmware_url must not contain whitespace".into(),
            ));
        }
        Ok(Box::new(PreparedUpgrade {
            target,
            firmware_url,
        }))
    }
}

impl PreparedAction for PreparedUpgrade {
    fn device_ip(&self) -> &str {
        &self.target.device_ip
    }

    fn is_mutating(&self) -> bool {
        true
    }

    fn precheck(
        &self,
        ctx: &mut ActionContext<'_>,
        result: &mut DeviceCheckResult,
    ) -> Result<(), SessionError> {
        self.target.prechecks(ctx, result)
    }

    fn apply(
        &self,
        ctx: &mut ActionContext<'_>,
        result: &mut DeviceCheckResult,
    ) -> Result<(), SessionError> {
        let before = read_version(ctx)?;
        result.firmware_version_before = before.map(|v| v.to_string());

        if let Some(version) = before.filter(|v| v.is_final()) {
            ctx.info(format!("firmware {version} is already final; skipping upgrade"));
            result.firmware_version_after = Some(version.to_string());
            result.firmware_final = Some(true);
            return Ok(());
        }

        ctx.info(format!("transferring firmware from {}", self.firmware_url));
        ctx.run(&format!("copy sw {}", self.firmware_url))?;

        // The radio usually reboots here and drops the session; that error
        // surfaces as transient and the job waits for `radio.verify`.
        ctx.info("activating firmware; device will reboot".into());
        let activation = ctx.run(ACTIVATE_SW)?;
        result.raw_status = status_line(&activation);

        let after = read_version(ctx)?;
        result.firmware_version_after = after.map(|v| v.to_string());
        settle_finality(result, after);
        Ok(())
    }
}

fn settle_finality(result: &mut DeviceCheckResult, version: Option<FirmwareVersion>) {
    match version {
        Some(v) if v.is_final() => {
            result.firmware_final = Some(true);
        }
        Some(v) => {
            result.firmware_final = Some(false);
            result.error = Some(format!(
                "firmware {v} is below final version {MIN_FINAL_VERSION}"
            ));
        }
        None => {
            result.firmware_final = Some(false);
            result.error = Some("firmware version not reported by device".into());
        }
    }
}

// ── radio.verify ────────────────────────────────────────────────────

pub struct RadioVerify;

struct PreparedVerify(String);

impl DeviceHandler for RadioVerify {
    fn action(&self) -> &'static str {
        "radio.verify"
    }

    fn prepare(
        &self,
        payload: &serde_json::Value,
        _settings: &HandlerSettings,
    ) -> Result<Box<dyn PreparedAction>, ValidationError> {
        let p: RadioPayload = parse_payload(payload)?;
        Ok(Box::new(PreparedVerify(validate_device_ip(&p.device_ip)?)))
    }
}

impl PreparedAction for PreparedVerify {
    fn device_ip(&self) -> &str {
        &self.0
    }

    fn is_mutating(&self) -> bool {
        false
    }

    fn apply(
        &self,
        ctx: &mut ActionContext<'_>,
        result: &mut DeviceCheckResult,
    ) -> Result<(), SessionError> {
        let version = read_version(ctx)?;
        result.firmware_version_after = version.map(|v| v.to_string());
        if let Some(v) = version {
            ctx.info(format!("device reports firmware {v}"));
        }
        settle_finality(result, version);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::HandlerRegistry;

    fn prepare(
        action: &str,
        payload: serde_json::Value,
    ) -> Result<Box<dyn PreparedAction>, ValidationError> {
        HandlerRegistry::with_defaults().prepare(action, &payload, &HandlerSettings::default())
    }

    #[test]
    fn upgrade_requires_firmware_url() {
        let err = prepare(
            "radio.firmware_upgrade",
            serde_json::json!({"device_ip": "10.0.0.1"}),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ValidationError::Malformed(_)));
    }

    #[test]
    fn upgrade_rejects_unknown_url_scheme() {
        let err = prepare(
            "radio.firmware_upgrade",
            serde_json::json!({"device_ip": "10.0.0.1", "firmware_url": "file:///etc/passwd"}),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("firmware_url"));
    }

    #[test]
    fn upgrade_is_mutating_and_precheck_is_not() {
        let upgrade = prepare(
            "radio.firmware_upgrade",
            serde_json::json!({
                "device_ip": "10.0.0.1",
                "firmware_url": "https://fw.example/6.1.0.bin",
            }),
        )
        .ok()
        .unwrap();
        assert!(upgrade.is_mutating());
        assert_eq!(upgrade.device_ip(), "10.0.0.1");

        let check = prepare("radio.precheck", serde_json::json!({"device_ip": "10.0.0.1"}))
            .ok()
            .unwrap();
        assert!(!check.is_mutating());
    }

    #[test]
    fn finality_is_settled_numerically() {
        let mut result = DeviceCheckResult::new("10.0.0.1");
        settle_finality(&mut result, Some(FirmwareVersion::new(6, 2, 0)));
        assert_eq!(result.firmware_final, Some(true));
        assert!(result.error.is_none());

        let mut result = DeviceCheckResult::new("10.0.0.1");
        settle_finality(&mut result, Some(FirmwareVersion::new(2, 11, 11)));
        assert_eq!(result.firmware_final, Some(false));
        assert_eq!(
            result.error.as_deref(),
            Some("firmware 2.11.11 is below final version 6.1.0")
        );
    }
}
