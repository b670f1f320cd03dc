//! netfleet control plane library.
//!
//! Exposes the API router, shared state and the gateway building blocks so
//! they can be used by integration tests.

pub mod api;
pub mod auth;
pub mod config;
pub mod credentials;
pub mod idempotency;
pub mod jobs;
pub mod replay;
pub mod state;
