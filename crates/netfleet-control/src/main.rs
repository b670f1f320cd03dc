//! netfleet control plane
//!
//! Single binary that serves the signed job API and runs device actions
//! over SSH on a blocking worker pool.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use netfleet_common::clock::{Clock, SystemClock};
use netfleet_control::config::Cli;
use netfleet_control::{api, state};
use netfleet_engine::{DeviceWorker, HandlerRegistry, SshConnector, TransientSignatures};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ──────────────────────────────────────────────────
    let config = Cli::parse()
        .into_config()
        .map_err(|e| anyhow::anyhow!("configuration error: {e}"))?;
    tracing::info!(
        api_keys = config.credentials.api_key_count(),
        signing_keys = config.credentials.signing_key_count(),
        require_signature = config.require_signature,
        require_idempotency = config.require_idempotency,
        "configuration loaded"
    );

    // ── Execution engine ────────────────────────────────────────
    let signatures = TransientSignatures::with_extra(&config.extra_transient_signatures);
    let connector = SshConnector::new(
        config.ssh_user.clone(),
        config.connect_timeout,
        config.command_timeout,
    );
    let registry = HandlerRegistry::with_defaults();
    tracing::info!(actions = ?registry.actions(), "device handlers registered");
    let worker = DeviceWorker::new(
        registry,
        Arc::new(connector),
        signatures,
        config.handler_settings.clone(),
    );

    // ── Shared state ────────────────────────────────────────────
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let state = state::AppState::new(&config, worker, clock);
    tokio::spawn(state.clone().run_sweeper(config.sweep_interval));

    // ── Listen ──────────────────────────────────────────────────
    let app = api::app(state);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!("netfleet-control listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}
