//! netfleet device execution engine.
//!
//! Drives remote device sessions for a single job: runs read-only
//! prechecks, applies the action under a per-device lock, and classifies
//! the outcome as succeeded, pending verification (the device went away
//! mid-action, e.g. rebooting into new firmware) or failed.

pub mod classify;
pub mod firmware;
pub mod handlers;
pub mod locks;
pub mod precheck;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod worker;

pub use classify::{Classification, TransientSignatures};
pub use handlers::{HandlerRegistry, HandlerSettings, PolicyViolation, ValidationError};
pub use session::{DeviceSession, SessionConnector, SessionError, SshConnector};
pub use worker::{DeviceWorker, EventSink};
