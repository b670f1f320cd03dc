//! Shared application state.

use std::sync::Arc;
use std::time::Duration;

use netfleet_common::clock::Clock;
use netfleet_engine::DeviceWorker;

use crate::auth::AuthGate;
use crate::config::GatewayConfig;
use crate::idempotency::IdempotencyStore;
use crate::jobs::JobOrchestrator;
use crate::replay::ReplayGuard;

/// State shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

struct Inner {
    gate: AuthGate,
    orchestrator: Arc<JobOrchestrator>,
    require_idempotency: bool,
    max_body_bytes: usize,
}

impl AppState {
    pub fn new(config: &GatewayConfig, worker: DeviceWorker, clock: Arc<dyn Clock>) -> Self {
        let gate = AuthGate::new(
            config.credentials.clone(),
            ReplayGuard::new(config.nonce_ttl_secs, clock.clone()),
            config.require_signature,
            config.signature_skew_secs,
            clock.clone(),
        );
        let orchestrator = JobOrchestrator::new(
            Arc::new(worker),
            IdempotencyStore::new(config.idempotency_ttl_secs, clock.clone()),
            clock,
        );
        Self {
            inner: Arc::new(Inner {
                gate,
                orchestrator: Arc::new(orchestrator),
                require_idempotency: config.require_idempotency,
                max_body_bytes: config.max_body_bytes,
            }),
        }
    }

    pub fn gate(&self) -> &AuthGate {
        &self.inner.gate
    }

    pub fn orchestrator(&self) -> &Arc<JobOrchestrator> {
        &self.inner.orchestrator
    }

    pub fn require_idempotency(&self) -> bool {
        self.inner.require_idempotency
    }

    pub fn max_body_bytes(&self) -> usize {
        self.inner.max_body_bytes
    }

    /// Evict expired nonces and idempotency records.
    pub fn sweep_expired(&self) -> (usize, usize) {
        let nonces = self.inner.gate.replay_guard().purge_expired();
        let keys = self.inner.orchestrator.idempotency().purge_expired();
        (nonces, keys)
    }

    /// Run [`AppState::sweep_expired`] forever on a fixed interval.
    pub async fn run_sweeper(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let (nonces, keys) = self.sweep_expired();
            if nonces + keys > 0 {
                tracing::debug!(nonces, idempotency_keys = keys, "swept expired entries");
            }
        }
    }
}
