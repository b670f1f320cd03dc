//! Access switch actions.
//!
//! - `switch.precheck`: subnet + spanning-tree checks
//! - `switch.port_config`: port-role policy, then uplink/access assignment

use std::collections::BTreeMap;

use netfleet_common::models::DeviceCheckResult;
use serde::Deserialize;

use super::{
    ActionContext, DeviceHandler, HandlerSettings, PolicyViolation, PreparedAction,
    ValidationError, parse_payload, validate_device_ip,
};
use crate::precheck;
use crate::session::SessionError;

const SHOW_IP_INTERFACE: &str = "show ip interface";
const SHOW_SPANNING_TREE: &str = "show spanning-tree";

#[derive(Debug, Deserialize)]
struct SwitchPayload {
    device_ip: String,
    #[serde(default)]
    expected_subnet_mask: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PortConfigPayload {
    device_ip: String,
    #[serde(default)]
    expected_subnet_mask: Option<String>,
    #[serde(default)]
    management_port: Option<u16>,
    #[serde(default)]
    uplink_ports: Vec<u16>,
    #[serde(default)]
    access_ports: Vec<u16>,
    #[serde(default = "default_access_vlan")]
    access_vlan: u16,
}

fn default_access_vlan() -> u16 {
    1
}

#[derive(Debug, Clone)]
struct SwitchTarget {
    device_ip: String,
    expected_mask: String,
}

impl SwitchTarget {
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
        let ip_output = ctx.run(SHOW_IP_INTERFACE)?;
        let outcome = precheck::check_subnet_mask(&ip_output, &self.expected_mask);
        ctx.record_precheck(result, precheck::SUBNET_MASK, outcome);

        let stp_output = ctx.run(SHOW_SPANNING_TREE)?;
        let outcome = precheck::check_stp(&stp_output, ctx.settings.expect_stp_enabled);
        ctx.record_precheck(result, precheck::STP, outcome);
        Ok(())
    }
}

// ── switch.precheck ─────────────────────────────────────────────────

pub struct SwitchPrecheck;

struct PreparedPrecheck(SwitchTarget);

impl DeviceHandler for SwitchPrecheck {
    fn action(&self) -> &'static str {
        "switch.precheck"
    }

    fn prepare(
        &self,
        payload: &serde_json::Value,
        settings: &HandlerSettings,
    ) -> Result<Box<dyn PreparedAction>, ValidationError> {
        let p: SwitchPayload = parse_payload(payload)?;
        let target = SwitchTarget::new(&p.device_ip, p.expected_subnet_mask, settings)?;
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

// ── switch.port_config ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortRole {
    Management,
    Uplink,
    Access,
}

impl PortRole {
    fn as_str(self) -> &'static str {
        match self {
            PortRole::Management => "management",
            PortRole::Uplink => "uplink",
            PortRole::Access => "access",
        }
    }
}

/// Assign every port exactly one role, enforcing the static port policy.
fn assign_port_roles(
    p: &PortConfigPayload,
    settings: &HandlerSettings,
) -> Result<BTreeMap<u16, PortRole>, ValidationError> {
    let requested = p
        .management_port
        .iter()
        .map(|&port| (port, PortRole::Management))
        .chain(p.uplink_ports.iter().map(|&port| (port, PortRole::Uplink)))
        .chain(p.access_ports.iter().map(|&port| (port, PortRole::Access)));

    let mut roles = BTreeMap::new();
    for (port, role) in requested {
        if port == 0 || port > settings.switch_port_count {
            return Err(ValidationError::Malformed(format!(
                "port {port} is outside 1..={}",
                settings.switch_port_count
            )));
        }
        if settings.reserved_switch_ports.contains(&port) {
            return Err(PolicyViolation::new(format!(
                "port {port} is reserved and cannot be assigned to {}",
                role.as_str()
            ))
            .into());
        }
        match roles.get(&port).copied() {
            None => {
                roles.insert(port, role);
            }
            Some(existing) if existing == role => {}
            Some(PortRole::Management) => {
                return Err(reserved_for_management(port, role).into());
            }
            Some(existing) if role == PortRole::Management => {
                return Err(reserved_for_management(port, existing).into());
            }
            Some(existing) => {
                return Err(PolicyViolation::new(format!(
                    "port {port} cannot serve both {} and {}",
                    existing.as_str(),
                    role.as_str()
                ))
                .into());
            }
        }
    }

    if !roles.values().any(|r| matches!(r, PortRole::Uplink | PortRole::Access)) {
        return Err(ValidationError::Malformed(
            "at least one uplink or access port is required".into(),
        ));
    }
    Ok(roles)
}

fn reserved_for_management(port: u16, conflicting: PortRole) -> PolicyViolation {
    PolicyViolation::new(format!(
        "port {port} is reserved for management and cannot be reused for {}",
        conflicting.as_str()
    ))
}

pub struct SwitchPortConfig;

struct PreparedPortConfig {
    target: SwitchTarget,
    roles: BTreeMap<u16, PortRole>,
    access_vlan: u16,
}

impl DeviceHandler for SwitchPortConfig {
    fn action(&self) -> &'static str {
        "switch.port_config"
    }

    fn prepare(
        &self,
        payload: &serde_json::Value,
        settings: &HandlerSettings,
    ) -> Result<Box<dyn PreparedAction>, ValidationError> {
        let p: PortConfigPayload = parse_payload(payload)?;
        let target = SwitchTarget::new(&p.device_ip, p.expected_subnet_mask.clone(), settings)?;
        if !(1..=4094).contains(&p.access_vlan) {
            return Err(ValidationError::Malformed(format!(
                "access_vlan {} is outside 1..=4094",
                p.access_vlan
            )));
        }
        let roles = assign_port_roles(&p, settings)?;
        Ok(Box::new(PreparedPortConfig {
            target,
            roles,
            access_vlan: p.access_vlan,
        }))
    }
}

impl PreparedPortConfig {
    fn commands(&self) -> Vec<String> {
        let mut commands = vec!["configure terminal".to_string()];
        for (port, role) in &self.roles {
            commands.push(format!("interface port {port}"));
            match role {
                PortRole::Management => commands.push("switchport mode management".into()),
                PortRole::Uplink => commands.push("switchport mode trunk".into()),
                PortRole::Access => {
                    commands.push("switchport mode access".into());
                    commands.push(format!("switchport access vlan {}", self.access_vlan));
                }
            }
            commands.push("exit".into());
        }
        commands.push("end".into());
        commands.push("write memory".into());
        commands
    }
}

impl PreparedAction for PreparedPortConfig {
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
        _result: &mut DeviceCheckResult,
    ) -> Result<(), SessionError> {
        ctx.info(format!("configuring {} ports", self.roles.len()));
        for command in self.commands() {
            ctx.run(&command)?;
        }
        ctx.info("port configuration saved".into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(value: serde_json::Value) -> PortConfigPayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn distinct_roles_are_accepted() {
        let p = payload(serde_json::json!({
            "device_ip": "10.0.0.5",
            "management_port": 48,
            "uplink_ports": [49, 50],
            "access_ports": [1, 2, 3],
        }));
        let roles = assign_port_roles(&p, &HandlerSettings::default()).unwrap();
        assert_eq!(roles.len(), 6);
        assert_eq!(roles[&48], PortRole::Management);
        assert_eq!(roles[&49], PortRole::Uplink);
        assert_eq!(roles[&1], PortRole::Access);
    }

    #[test]
    fn management_port_cannot_be_reused() {
        let p = payload(serde_json::json!({
            "device_ip": "10.0.0.5",
            "management_port": 48,
            "access_ports": [47, 48],
        }));
        let err = assign_port_roles(&p, &HandlerSettings::default()).unwrap_err();
        assert!(matches!(err, ValidationError::Policy(_)));
        assert_eq!(
            err.to_string(),
            "policy violation: port 48 is reserved for management and cannot be reused for access"
        );
    }

    #[test]
    fn port_cannot_be_uplink_and_access() {
        let p = payload(serde_json::json!({
            "device_ip": "10.0.0.5",
            "uplink_ports": [24],
            "access_ports": [24],
        }));
        let err = assign_port_roles(&p, &HandlerSettings::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "policy violation: port 24 cannot serve both uplink and access"
        );
    }

    #[test]
    fn fleet_reserved_ports_are_enforced() {
        let settings = HandlerSettings {
            reserved_switch_ports: vec![52],
            ..Default::default()
        };
        let p = payload(serde_json::json!({
            "device_ip": "10.0.0.5",
            "uplink_ports": [52],
        }));
        let err = assign_port_roles(&p, &settings).unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn out_of_range_port_is_malformed() {
        let p = payload(serde_json::json!({
            "device_ip": "10.0.0.5",
            "access_ports": [99],
        }));
        let err = assign_port_roles(&p, &HandlerSettings::default()).unwrap_err();
        assert!(matches!(err, ValidationError::Malformed(_)));
    }

    #[test]
    fn commands_cover_every_port_and_save() {
        let prepared = PreparedPortConfig {
            target: SwitchTarget {
                device_ip: "10.0.0.5".into(),
                expected_mask: "255.255.255.248".into(),
            },
            roles: BTreeMap::from([(1, PortRole::Access), (49, PortRole::Uplink)]),
            access_vlan: 30,
        };
        let commands = prepared.commands();
        assert_eq!(commands.first().map(String::as_str), Some("configure terminal"));
        assert!(commands.contains(&"switchport access vlan 30".to_string()));
        assert!(commands.contains(&"switchport mode trunk".to_string()));
        assert_eq!(commands.last().map(String::as_str), Some("write memory"));
    }
}
