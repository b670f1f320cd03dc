//! Request authentication: API key, HMAC signature, freshness, replay.
//!
//! Every step is a hard gate. The replay guard is only written once the
//! signature has verified and the timestamp is fresh, so forged requests
//! cannot burn nonces belonging to a legitimate client.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::http::HeaderMap;
use netfleet_common::clock::Clock;
use netfleet_common::signing::{
    self, HEADER_API_KEY, HEADER_KEY_ID, HEADER_NONCE, HEADER_SIGNATURE, HEADER_TIMESTAMP,
};
use thiserror::Error;

use crate::credentials::CredentialStore;
use crate::replay::ReplayGuard;

/// Why a request was refused. Messages name the category only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Missing API key")]
    MissingApiKey,
    #[error("Invalid API key")]
    InvalidApiKey,
    #[error("Missing signature headers")]
    MissingSignatureHeaders,
    #[error("Invalid signing key")]
    InvalidSigningKey,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Stale timestamp")]
    StaleTimestamp,
    #[error("Replayed nonce")]
    ReplayedNonce,
}

impl AuthError {
    /// Short label for logs and metrics.
    pub fn category(self) -> &'static str {
        match self {
            AuthError::MissingApiKey => "missing_api_key",
            AuthError::InvalidApiKey => "invalid_api_key",
            AuthError::MissingSignatureHeaders => "missing_signature_headers",
            AuthError::InvalidSigningKey => "invalid_signing_key",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::StaleTimestamp => "stale_timestamp",
            AuthError::ReplayedNonce => "replayed_nonce",
        }
    }
}

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub api_key: String,
    pub roles: BTreeSet<String>,
    /// Signing key that vouched for the request, when signatures are on.
    pub key_id: Option<String>,
}

impl Principal {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

/// The parts of a request the gate looks at.
#[derive(Debug, Clone, Copy)]
pub struct AuthRequest<'a> {
    pub method: &'a str,
    /// Full request path; any query string is ignored.
    pub path: &'a str,
    pub headers: &'a HeaderMap,
    pub body: &'a [u8],
}

pub struct AuthGate {
    credentials: CredentialStore,
    replay: ReplayGuard,
    signature_required: bool,
    skew_secs: i64,
    clock: Arc<dyn Clock>,
}

impl AuthGate {
    pub fn new(
        credentials: CredentialStore,
        replay: ReplayGuard,
        signature_required: bool,
        skew_secs: i64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            credentials,
            replay,
            signature_required,
            skew_secs,
            clock,
        }
    }

    pub fn replay_guard(&self) -> &ReplayGuard {
        &self.replay
    }

    pub fn authenticate(&self, req: &AuthRequest<'_>) -> Result<Principal, AuthError> {
        let api_key = header(req.headers, HEADER_API_KEY).ok_or(AuthError::MissingApiKey)?;
        let roles = self
            .credentials
            .roles_for(api_key)
            .ok_or(AuthError::InvalidApiKey)?;

        let mut principal = Principal {
            api_key: api_key.to_string(),
            roles: roles.clone(),
            key_id: None,
        };
        if !self.signature_required {
            return Ok(principal);
        }

        let (Some(key_id), Some(timestamp), Some(nonce), Some(signature)) = (
            header(req.headers, HEADER_KEY_ID),
            header(req.headers, HEADER_TIMESTAMP),
            header(req.headers, HEADER_NONCE),
            header(req.headers, HEADER_SIGNATURE),
        ) else {
            return Err(AuthError::MissingSignatureHeaders);
        };

        let secret = self
            .credentials
            .signing_secret(key_id)
            .ok_or(AuthError::InvalidSigningKey)?;

        let canonical = signing::canonical_string(req.method, req.path, timestamp, nonce, req.body);
        match signing::verify(secret, &canonical, signature) {
            Ok(true) => {}
            Ok(false) | Err(_) => return Err(AuthError::InvalidSignature),
        }

        let ts: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| AuthError::StaleTimestamp)?;
        let now = self.clock.unix_seconds();
        if now.abs_diff(ts) > self.skew_secs.unsigned_abs() {
            return Err(AuthError::StaleTimestamp);
        }

        if !self.replay.check_and_record(key_id, nonce) {
            return Err(AuthError::ReplayedNonce);
        }

        principal.key_id = Some(key_id.to_string());
        Ok(principal)
    }
}

/// Header value as text; empty or non-ASCII values count as absent.
fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};

    use axum::http::{HeaderName, HeaderValue};
    use netfleet_common::clock::ManualClock;

    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn gate(signature_required: bool) -> (AuthGate, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_unix(NOW));
        let credentials = CredentialStore::new(
            HashMap::from([(
                "k-ops".to_string(),
                BTreeSet::from(["operator".to_string()]),
            )]),
            HashMap::from([("ops".to_string(), "s3cret".to_string())]),
        );
        let gate = AuthGate::new(
            credentials,
            ReplayGuard::new(900, clock.clone()),
            signature_required,
            300,
            clock.clone(),
        );
        (gate, clock)
    }

    fn signed(ts: i64, nonce: &str, body: &[u8]) -> HeaderMap {
        let signed = signing::sign_request(
            "ops",
            "s3cret",
            "POST",
            "/jobs-namespace/jobs",
            ts,
            nonce,
            body,
        )
        .unwrap();
        let mut headers = HeaderMap::new();
        for (name, value) in [
            (HEADER_API_KEY, "k-ops".to_string()),
            (HEADER_KEY_ID, signed.key_id),
            (HEADER_TIMESTAMP, signed.timestamp),
            (HEADER_NONCE, signed.nonce),
            (HEADER_SIGNATURE, signed.signature),
        ] {
            headers.insert(
                HeaderName::from_static(name),
                HeaderValue::from_str(&value).unwrap(),
            );
        }
        headers
    }

    fn post<'a>(headers: &'a HeaderMap, body: &'a [u8]) -> AuthRequest<'a> {
        AuthRequest {
            method: "POST",
            path: "/jobs-namespace/jobs",
            headers,
            body,
        }
    }

    #[test]
    fn missing_and_unknown_api_keys() {
        let (gate, _) = gate(false);
        let empty = HeaderMap::new();
        assert_eq!(gate.authenticate(&post(&empty, b"")), Err(AuthError::MissingApiKey));

        let mut headers = HeaderMap::new();
        headers.insert(HEADER_API_KEY, HeaderValue::from_static(""));
        assert_eq!(gate.authenticate(&post(&headers, b"")), Err(AuthError::MissingApiKey));

        headers.insert(HEADER_API_KEY, HeaderValue::from_static("k-nope"));
        assert_eq!(gate.authenticate(&post(&headers, b"")), Err(AuthError::InvalidApiKey));
    }

    #[test]
    fn api_key_alone_passes_when_signatures_are_off() {
        let (gate, _) = gate(false);
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_API_KEY, HeaderValue::from_static("k-ops"));
        let principal = gate.authenticate(&post(&headers, b"")).unwrap();
        assert_eq!(principal.api_key, "k-ops");
        assert!(principal.has_role("operator"));
        assert_eq!(principal.key_id, None);
    }

    #[test]
    fn signature_headers_are_required_when_enabled() {
        let (gate, _) = gate(true);
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_API_KEY, HeaderValue::from_static("k-ops"));
        assert_eq!(
            gate.authenticate(&post(&headers, b"")),
            Err(AuthError::MissingSignatureHeaders)
        );
    }

    #[test]
    fn valid_signature_is_accepted_once() {
        let (gate, _) = gate(true);
        let body = br#"{"action":"radio.precheck"}"#;
        let headers = signed(NOW, "n-1", body);

        let principal = gate.authenticate(&post(&headers, body)).unwrap();
        assert_eq!(principal.key_id.as_deref(), Some("ops"));
        assert_eq!(gate.authenticate(&post(&headers, body)), Err(AuthError::ReplayedNonce));
    }

    #[test]
    fn tampered_body_fails_without_burning_the_nonce() {
        let (gate, _) = gate(true);
        let headers = signed(NOW, "n-2", b"original");
        assert_eq!(
            gate.authenticate(&post(&headers, b"tampered")),
            Err(AuthError::InvalidSignature)
        );
        assert!(gate.replay_guard().is_empty());
        assert!(gate.authenticate(&post(&headers, b"original")).is_ok());
    }

    #[test]
    fn unknown_signing_key_is_rejected() {
        let (gate, _) = gate(true);
        let mut headers = signed(NOW, "n-3", b"");
        headers.insert(HEADER_KEY_ID, HeaderValue::from_static("ghost"));
        assert_eq!(gate.authenticate(&post(&headers, b"")), Err(AuthError::InvalidSigningKey));
    }

    #[test]
    fn stale_timestamps_are_rejected_both_ways() {
        let (gate, _) = gate(true);
        let old = signed(NOW - 301, "n-4", b"");
        assert_eq!(gate.authenticate(&post(&old, b"")), Err(AuthError::StaleTimestamp));
        let future = signed(NOW + 301, "n-5", b"");
        assert_eq!(gate.authenticate(&post(&future, b"")), Err(AuthError::StaleTimestamp));
        let edge = signed(NOW - 300, "n-6", b"");
        assert!(gate.authenticate(&post(&edge, b"")).is_ok());
        assert_eq!(gate.replay_guard().len(), 1);
    }

    #[test]
    fn query_string_does_not_affect_signature() {
        let (gate, _) = gate(true);
        let headers = signed(NOW, "n-7", b"");
        let req = AuthRequest {
            method: "post",
            path: "/jobs-namespace/jobs?debug=1",
            headers: &headers,
            body: b"",
        };
        assert!(gate.authenticate(&req).is_ok());
    }
}
