//! Request-signing primitives.
//!
//! A signed request carries `X-Key-Id`, `X-Timestamp`, `X-Nonce` and
//! `X-Signature`. The signature is the hex HMAC-SHA256, keyed by the secret
//! registered for the key id, over the canonical string:
//!
//! ```text
//! METHOD "\n" PATH "\n" TIMESTAMP "\n" NONCE "\n" SHA256HEX(BODY)
//! ```
//!
//! The method is upper-cased and the path excludes any query string.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_API_KEY: &str = "x-api-key";
pub const HEADER_KEY_ID: &str = "x-key-id";
pub const HEADER_TIMESTAMP: &str = "x-timestamp";
pub const HEADER_NONCE: &str = "x-nonce";
pub const HEADER_SIGNATURE: &str = "x-signature";
pub const HEADER_IDEMPOTENCY_KEY: &str = "idempotency-key";

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("signing key rejected by HMAC")]
    InvalidKey,
}

/// Hex-encoded SHA-256 digest of a request body.
pub fn body_digest(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// Build the canonical string a signature is computed over.
pub fn canonical_string(
    method: &str,
    path: &str,
    timestamp: &str,
    nonce: &str,
    body: &[u8],
) -> String {
    let path = path.split_once('?').map_or(path, |(p, _)| p);
    format!(
        "{}\n{}\n{}\n{}\n{}",
        method.to_ascii_uppercase(),
        path,
        timestamp,
        nonce,
        body_digest(body)
    )
}

fn mac(secret: &str, canonical: &str) -> Result<Vec<u8>, SigningError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SigningError::InvalidKey)?;
    mac.update(canonical.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Hex HMAC-SHA256 of `canonical` under `secret`.
pub fn sign(secret: &str, canonical: &str) -> Result<String, SigningError> {
    mac(secret, canonical).map(hex::encode)
}

/// Constant-time check of a supplied hex signature.
///
/// Malformed hex is simply a mismatch.
pub fn verify(secret: &str, canonical: &str, signature_hex: &str) -> Result<bool, SigningError> {
    let expected = mac(secret, canonical)?;
    let Ok(supplied) = hex::decode(signature_hex.trim()) else {
        return Ok(false);
    };
    if supplied.len() != expected.len() {
        return Ok(false);
    }
    Ok(bool::from(expected.ct_eq(&supplied)))
}

/// Headers for a signed request, as a client would attach them.
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    pub key_id: String,
    pub timestamp: String,
    pub nonce: String,
    pub signature: String,
}

/// Sign a request on behalf of a client.
pub fn sign_request(
    key_id: &str,
    secret: &str,
    method: &str,
    path: &str,
    timestamp: i64,
    nonce: &str,
    body: &[u8],
) -> Result<SignedHeaders, SigningError> {
    let timestamp = timestamp.to_string();
    let canonical = canonical_string(method, path, &timestamp, nonce, body);
    Ok(SignedHeaders {
        key_id: key_id.to_string(),
        signature: sign(secret, &canonical)?,
        timestamp,
        nonce: nonce.to_string(),
    })
}
