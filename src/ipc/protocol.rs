//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.
//! Subscribed clients additionally receive [`VoiceEvent`] frames pushed by the
//! daemon.

use serde::{Deserialize, Serialize};

use crate::events::VoiceStatus;
use crate::permission::PermissionState;

/// Requests from the host application to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current daemon status
    GetStatus,

    /// Begin continuous listening
    StartListening,

    /// Stop listening
    StopListening,

    /// Report a microphone consent change observed by the host platform
    ReportPermission { state: PermissionState },

    /// Ping to check connectivity
    Ping,

    /// Subscribe to command and status notifications
    Subscribe,
}

/// Responses from the daemon to the host application
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// Request handed to the voice controller
    Accepted,

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Uptime in seconds
    pub uptime_secs: u64,

    /// Voice controller status feed
    pub voice: VoiceStatus,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: 0,
            voice: VoiceStatus::default(),
        }
    }
}
