//! Prefixed ID generation.
//!
//! All IDs use a `prefix_` followed by a UUIDv7 (time-ordered), so job IDs
//! sort by submission time and are identifiable in logs at a glance.

use uuid::Uuid;

fn prefixed_id(prefix: &str) -> String {
    let id = Uuid::now_v7();
    format!("{}_{}", prefix, id.as_simple())
}

/// Generate a job ID: `job_<uuid7>`
pub fn job_id() -> String {
    prefixed_id("job")
}

/// Generate a request nonce for signed requests: `nce_<uuid7>`
pub fn nonce() -> String {
    prefixed_id("nce")
}
