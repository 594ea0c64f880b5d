//! Recognition session module
//!
//! Provides the state machine around the continuous recognition capability:
//! - Idle: nothing running
//! - Listening: engine running (or a restart is about to run it again)
//! - Processing: a transcript is being acted on
//! - Error: a recoverable engine error, still listening
//! - PermissionDenied: microphone refused, auto-restart suppressed

mod classify;
mod input;
mod machine;

pub use classify::{ErrorEvent, ErrorKind};
pub use input::{SessionInput, TranscriptEvent};
pub use machine::{RecognitionSession, SessionConfig, SessionState};
