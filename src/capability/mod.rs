//! Ports onto the external speech capabilities
//!
//! Capability calls return immediately. Their completion (results, errors,
//! end of a recognition turn, start/end of an utterance) is reported later as
//! [`SessionInput`] values on the controller's queue.

mod console;
mod narrator;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::{Config, RecognizerBackend, SynthesizerBackend};
use crate::error::{CapabilityError, VoiceError};
use crate::session::SessionInput;

pub use console::ConsoleRecognizer;
pub use narrator::LogSynthesizer;

/// Settings handed to the recognition capability at construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognizerSettings {
    /// Keep producing transcripts across utterances
    pub continuous: bool,
    /// Deliver partial transcripts
    pub interim_results: bool,
    /// BCP 47 language tag
    pub language: String,
}

impl Default for RecognizerSettings {
    fn default() -> Self {
        Self {
            continuous: true,
            interim_results: false,
            language: "en-US".to_string(),
        }
    }
}

/// Continuous speech-to-text capability
pub trait Recognizer: Send {
    /// Begin a recognition turn. Results arrive as `Transcript`,
    /// `RecognitionError` and finally `RecognitionEnd`.
    fn start(&mut self) -> Result<(), CapabilityError>;

    /// Ask the engine to stop; it still reports `RecognitionEnd` afterwards
    fn stop(&mut self);
}

/// Identifies one `speak` request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct UtteranceId(pub u64);

impl std::fmt::Display for UtteranceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "utterance#{}", self.0)
    }
}

/// Text-to-speech capability
pub trait Synthesizer: Send {
    /// Start speaking; reports `SpeechStarted(id)` then `SpeechEnded(id)`
    fn speak(&mut self, id: UtteranceId, text: &str);

    /// Cut off whatever is being spoken
    fn cancel(&mut self);
}

/// The capabilities the environment provides
pub struct Capabilities {
    pub recognizer: Box<dyn Recognizer>,
    pub synthesizer: Box<dyn Synthesizer>,
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities").finish_non_exhaustive()
    }
}

/// Build the configured capabilities, or report the environment unsupported
///
/// Must be called from within a tokio runtime; the console recognizer spawns
/// its stdin reader here.
pub fn detect(
    config: &Config,
    input_tx: &mpsc::Sender<SessionInput>,
) -> Result<Capabilities, VoiceError> {
    if config.recognizer == RecognizerBackend::None {
        return Err(VoiceError::Unsupported(
            "no speech recognition capability available".to_string(),
        ));
    }
    if config.synthesizer == SynthesizerBackend::None {
        return Err(VoiceError::Unsupported(
            "no speech output capability available".to_string(),
        ));
    }

    let recognizer = ConsoleRecognizer::spawn(config.recognizer_settings(), input_tx.clone());
    let synthesizer = LogSynthesizer::new(input_tx.clone());

    info!(
        recognizer = ?config.recognizer,
        synthesizer = ?config.synthesizer,
        "speech capabilities ready"
    );

    Ok(Capabilities {
        recognizer: Box::new(recognizer),
        synthesizer: Box::new(synthesizer),
    })
}
