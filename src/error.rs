//! Error types shared across the voice pipeline

use thiserror::Error;

/// A capability call that failed synchronously
///
/// Engines report failures as short string codes (`not-allowed`,
/// `no-speech`, ...). The code is kept verbatim so it can be classified the
/// same way as an asynchronous error event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("capability call failed: {code}")]
pub struct CapabilityError {
    /// Raw engine code
    pub code: String,
}

impl CapabilityError {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

/// Errors raised while assembling the voice pipeline
#[derive(Debug, Error)]
pub enum VoiceError {
    /// The environment lacks a capability voice commands need
    #[error("voice commands unsupported: {0}")]
    Unsupported(String),

    /// A configuration value could not be parsed
    #[error("invalid value for {key}: {message}")]
    Config { key: &'static str, message: String },
}
