//! Shared types for the netfleet platform.
//!
//! This crate contains:
//! - **Job models**: job status machine, events, device check results
//! - **Request signing**: canonical string, HMAC-SHA256 sign/verify
//! - **Clock**: injectable time source for TTL-bound stores
//! - **ID generation**: prefixed UUIDv7 helpers (`job_`, `nce_`)

pub mod clock;
pub mod ids;
pub mod models;
pub mod signing;
