//! Inputs consumed by the voice controller

use std::time::Instant;

use crate::capability::UtteranceId;
use crate::permission::PermissionState;
use crate::timer::TimerHandle;

/// Everything that can happen to the voice controller
///
/// User actions, capability callbacks and timer wake-ups all arrive on the
/// same queue and are handled one at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    /// User asked for continuous listening
    Start,
    /// User asked to stop listening
    Stop,
    /// Recognizer produced a final transcript
    Transcript(String),
    /// Recognizer reported an error code
    RecognitionError(String),
    /// Recognizer finished a recognition turn
    RecognitionEnd,
    /// Synthesizer began an utterance
    SpeechStarted(UtteranceId),
    /// Synthesizer finished an utterance
    SpeechEnded(UtteranceId),
    /// Platform reported a consent change
    PermissionChanged(PermissionState),
    /// A scheduled wake-up fired
    TimerElapsed(TimerHandle),
}

/// A transcript accepted for processing
#[derive(Debug, Clone)]
pub struct TranscriptEvent {
    pub text: String,
    pub received_at: Instant,
}

impl TranscriptEvent {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            received_at: Instant::now(),
        }
    }
}
