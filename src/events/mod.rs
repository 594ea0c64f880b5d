//! Events module for the host-facing feed
//!
//! Provides the status snapshot and the events broadcast to the host:
//! status changes, dispatched commands, and the one-time unsupported notice.

use serde::{Deserialize, Serialize};

use crate::commands::{CommandParams, CommandToken};
use crate::session::SessionState;

/// Microphone status as shown on the host's status line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MicrophoneStatus {
    #[default]
    Idle,
    Listening,
    Processing,
    Error,
    PermissionDenied,
    /// Voice commands are disabled in this environment
    Unsupported,
}

impl From<SessionState> for MicrophoneStatus {
    fn from(state: SessionState) -> Self {
        match state {
            SessionState::Idle => MicrophoneStatus::Idle,
            SessionState::Listening => MicrophoneStatus::Listening,
            SessionState::Processing => MicrophoneStatus::Processing,
            SessionState::Error => MicrophoneStatus::Error,
            SessionState::PermissionDenied => MicrophoneStatus::PermissionDenied,
        }
    }
}

/// Read-only status feed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceStatus {
    pub microphone_status: MicrophoneStatus,
    pub is_speaking: bool,
    pub last_command: Option<String>,
    /// Newest first, at most five entries
    pub command_history: Vec<String>,
    pub error_message: Option<String>,
}

impl VoiceStatus {
    /// Status reported when voice commands cannot run at all
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self {
            microphone_status: MicrophoneStatus::Unsupported,
            error_message: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// Events broadcast by the voice controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceEvent {
    /// The status snapshot changed
    StatusChanged(VoiceStatus),

    /// A command for the host application
    Command {
        token: CommandToken,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<CommandParams>,
    },

    /// Voice commands are unavailable in this environment
    Unsupported { reason: String },
}

impl std::fmt::Display for VoiceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoiceEvent::StatusChanged(status) => {
                write!(f, "STATUS_CHANGED ({:?})", status.microphone_status)
            }
            VoiceEvent::Command { token, .. } => write!(f, "COMMAND ({token})"),
            VoiceEvent::Unsupported { reason } => write!(f, "UNSUPPORTED ({reason})"),
        }
    }
}
