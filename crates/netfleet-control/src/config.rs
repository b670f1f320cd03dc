//! Gateway configuration.
//!
//! Every setting is a CLI flag with an environment fallback, so the binary
//! runs the same from a shell, a systemd unit or a container.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use netfleet_engine::HandlerSettings;
use thiserror::Error;

use crate::credentials::CredentialStore;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid API key table: {0}")]
    ApiKeys(#[source] serde_json::Error),
    #[error("invalid signing key table: {0}")]
    SigningKeys(#[source] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// netfleet control plane.
#[derive(Parser, Debug, Clone)]
#[command(name = "netfleet-control", about = "Signed job gateway for network device automation")]
pub struct Cli {
    /// Address the REST API listens on.
    #[arg(long, env = "NETFLEET_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: SocketAddr,

    /// API keys as JSON: {"key": ["role", ...]}.
    #[arg(long, env = "NETFLEET_API_KEYS", default_value = "{}", hide_env_values = true)]
    pub api_keys: String,

    /// Signing secrets as JSON: {"key_id": "secret"}.
    #[arg(long, env = "NETFLEET_SIGNING_KEYS", default_value = "{}", hide_env_values = true)]
    pub signing_keys: String,

    /// Require HMAC-signed requests.
    #[arg(
        long,
        env = "NETFLEET_REQUIRE_SIGNATURE",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub require_signature: bool,

    /// Require an Idempotency-Key header on job submission.
    #[arg(
        long,
        env = "NETFLEET_REQUIRE_IDEMPOTENCY",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub require_idempotency: bool,

    /// Maximum allowed distance between X-Timestamp and server time.
    #[arg(long, env = "NETFLEET_SIGNATURE_SKEW_SECONDS", default_value_t = 300)]
    pub signature_skew_seconds: i64,

    /// How long a used nonce is remembered.
    #[arg(long, env = "NETFLEET_NONCE_TTL_SECONDS", default_value_t = 900)]
    pub nonce_ttl_seconds: i64,

    /// How long an idempotency key maps to its job.
    #[arg(long, env = "NETFLEET_IDEMPOTENCY_TTL_SECONDS", default_value_t = 86_400)]
    pub idempotency_ttl_seconds: i64,

    /// Largest accepted request body.
    #[arg(long, env = "NETFLEET_MAX_BODY_BYTES", default_value_t = 1024 * 1024)]
    pub max_body_bytes: usize,

    /// SSH user for device sessions.
    #[arg(long, env = "NETFLEET_SSH_USER", default_value = "admin")]
    pub ssh_user: String,

    #[arg(long, env = "NETFLEET_CONNECT_TIMEOUT_SECONDS", default_value_t = 15)]
    pub connect_timeout_seconds: u64,

    #[arg(long, env = "NETFLEET_COMMAND_TIMEOUT_SECONDS", default_value_t = 120)]
    pub command_timeout_seconds: u64,

    /// Subnet mask every managed device interface must carry.
    #[arg(long, env = "NETFLEET_EXPECTED_SUBNET_MASK", default_value = "255.255.255.248")]
    pub expected_subnet_mask: String,

    /// Expected spanning-tree state on managed switches.
    #[arg(
        long,
        env = "NETFLEET_EXPECT_STP_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub expect_stp_enabled: bool,

    #[arg(long, env = "NETFLEET_SWITCH_PORT_COUNT", default_value_t = 52)]
    pub switch_port_count: u16,

    /// Switch ports no job may assign (comma separated).
    #[arg(long, env = "NETFLEET_RESERVED_SWITCH_PORTS", value_delimiter = ',')]
    pub reserved_switch_ports: Vec<u16>,

    /// Extra license bundle codes that count as paid (comma separated).
    #[arg(long, env = "NETFLEET_EXTRA_LICENSE_BUNDLES", value_delimiter = ',')]
    pub extra_license_bundles: Vec<String>,

    /// Extra error fragments to treat as transient (comma separated).
    #[arg(long, env = "NETFLEET_EXTRA_TRANSIENT_SIGNATURES", value_delimiter = ',')]
    pub extra_transient_signatures: Vec<String>,

    /// How often expired nonces and idempotency records are evicted.
    #[arg(long, env = "NETFLEET_SWEEP_INTERVAL_SECONDS", default_value_t = 60)]
    pub sweep_interval_seconds: u64,
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listen_addr: SocketAddr,
    pub credentials: CredentialStore,
    pub require_signature: bool,
    pub require_idempotency: bool,
    pub signature_skew_secs: i64,
    pub nonce_ttl_secs: i64,
    pub idempotency_ttl_secs: i64,
    pub max_body_bytes: usize,
    pub ssh_user: String,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub handler_settings: HandlerSettings,
    pub extra_transient_signatures: Vec<String>,
    pub sweep_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            credentials: CredentialStore::default(),
            require_signature: true,
            require_idempotency: true,
            signature_skew_secs: 300,
            nonce_ttl_secs: 900,
            idempotency_ttl_secs: 86_400,
            max_body_bytes: 1024 * 1024,
            ssh_user: "admin".into(),
            connect_timeout: Duration::from_secs(15),
            command_timeout: Duration::from_secs(120),
            handler_settings: HandlerSettings::default(),
            extra_transient_signatures: Vec::new(),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl Cli {
    pub fn into_config(self) -> Result<GatewayConfig, ConfigError> {
        let credentials = CredentialStore::from_json(&self.api_keys, &self.signing_keys)?;
        let config = GatewayConfig {
            listen_addr: self.listen_addr,
            credentials,
            require_signature: self.require_signature,
            require_idempotency: self.require_idempotency,
            signature_skew_secs: self.signature_skew_seconds,
            nonce_ttl_secs: self.nonce_ttl_seconds,
            idempotency_ttl_secs: self.idempotency_ttl_seconds,
            max_body_bytes: self.max_body_bytes,
            ssh_user: self.ssh_user,
            connect_timeout: Duration::from_secs(self.connect_timeout_seconds),
            command_timeout: Duration::from_secs(self.command_timeout_seconds),
            handler_settings: HandlerSettings {
                expected_subnet_mask: self.expected_subnet_mask,
                expect_stp_enabled: self.expect_stp_enabled,
                switch_port_count: self.switch_port_count,
                reserved_switch_ports: self.reserved_switch_ports,
                paid_license_bundles: paid_bundles(&self.extra_license_bundles),
            },
            extra_transient_signatures: self.extra_transient_signatures,
            sweep_interval: Duration::from_secs(self.sweep_interval_seconds.max(1)),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Built-in paid bundle codes followed by the operator's extras.
fn paid_bundles(extra: &[String]) -> Vec<String> {
    let mut codes = HandlerSettings::default().paid_license_bundles;
    for code in extra {
        let code = code.trim().to_ascii_uppercase();
        if !code.is_empty() && !codes.contains(&code) {
            codes.push(code);
        }
    }
    codes
}

impl GatewayConfig {
    /// Reject unusable settings and warn about risky ones.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signature_skew_secs <= 0 {
            return Err(ConfigError::Invalid("signature skew must be positive".into()));
        }
        if self.nonce_ttl_secs <= 0 || self.idempotency_ttl_secs <= 0 {
            return Err(ConfigError::Invalid("TTLs must be positive".into()));
        }
        if self
            .handler_settings
            .expected_subnet_mask
            .parse::<std::net::Ipv4Addr>()
            .is_err()
        {
            return Err(ConfigError::Invalid(format!(
                "expected subnet mask {:?} is not dotted-decimal",
                self.handler_settings.expected_subnet_mask
            )));
        }

        // A timestamp is fresh for 2×skew in total; a shorter nonce memory
        // would let a captured request replay inside that window.
        if self.nonce_ttl_secs < 2 * self.signature_skew_secs {
            tracing::warn!(
                nonce_ttl = self.nonce_ttl_secs,
                skew = self.signature_skew_secs,
                "nonce TTL is shorter than twice the signature skew"
            );
        }
        if self.credentials.api_key_count() == 0 {
            tracing::warn!("no API keys configured; every request will be rejected");
        }
        if self.require_signature && self.credentials.signing_key_count() == 0 {
            tracing::warn!("signatures required but no signing keys configured");
        }
        Ok(())
    }
}
