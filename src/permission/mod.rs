//! Microphone consent tracking
//!
//! Consent is reported by the platform (or by the host over IPC) and read by
//! the recognition session before every start.

mod monitor;

pub use monitor::{PermissionMonitor, PermissionState, PermissionSubscription};
