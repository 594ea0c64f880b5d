//! Classification of recognition error codes

use serde::Serialize;

/// How an engine error affects the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Consent refused; fatal until permission is granted again
    Permission,
    /// Network hiccup, silence, missing device; listening continues
    Transient,
    /// Engine confirming a requested stop
    Aborted,
}

/// A classified engine error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    pub raw_code: String,
    pub recoverable: bool,
    /// Restarting was abandoned after repeated failures
    pub gave_up: bool,
}

impl ErrorEvent {
    /// Classify a raw engine error code
    pub fn classify(code: &str) -> Self {
        let code = code.trim();
        let kind = match code {
            "not-allowed" | "service-not-allowed" => ErrorKind::Permission,
            "aborted" => ErrorKind::Aborted,
            _ => ErrorKind::Transient,
        };

        Self {
            kind,
            raw_code: code.to_string(),
            recoverable: kind != ErrorKind::Permission,
            gave_up: false,
        }
    }

    /// Mark the error as the one that made the session stop retrying
    pub fn mark_gave_up(mut self) -> Self {
        self.gave_up = true;
        self
    }

    /// The error a start attempt yields while consent is refused
    pub fn permission_refused() -> Self {
        Self::classify("not-allowed")
    }

    pub fn is_fatal(&self) -> bool {
        !self.recoverable
    }

    /// Status-line message for the user, if the error is worth showing
    pub fn message(&self) -> Option<String> {
        let message = match (self.kind, self.raw_code.as_str()) {
            (ErrorKind::Aborted, _) => return None,
            (_, code) if self.gave_up => {
                return Some(format!(
                    "Speech recognition stopped after repeated errors ({code}). Start listening to try again."
                ))
            }
            (ErrorKind::Permission, _) => {
                "Microphone access denied. Allow microphone access to use voice commands."
            }
            (_, "no-speech") => "No speech detected. Try speaking again.",
            (_, "network") => "Network error during speech recognition. Retrying.",
            (_, "audio-capture") => "No microphone found. Check that one is connected.",
            (_, code) => return Some(format!("Speech recognition error: {code}")),
        };
        Some(message.to_string())
    }
}
