//! Recognizer that treats stdin lines as recognized speech
//!
//! Lines typed while the recognizer is started become transcripts.
//! `!error <code>` simulates an engine error and `!end` ends the current
//! recognition turn, the way a real engine does after silence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::CapabilityError;
use crate::session::SessionInput;

use super::{Recognizer, RecognizerSettings};

pub struct ConsoleRecognizer {
    settings: RecognizerSettings,
    active: Arc<AtomicBool>,
    input_tx: mpsc::Sender<SessionInput>,
}

impl ConsoleRecognizer {
    /// Create the recognizer and spawn its stdin reader
    pub fn spawn(settings: RecognizerSettings, input_tx: mpsc::Sender<SessionInput>) -> Self {
        let active = Arc::new(AtomicBool::new(false));
        tokio::spawn(read_console(Arc::clone(&active), input_tx.clone()));

        Self {
            settings,
            active,
            input_tx,
        }
    }
}

impl Recognizer for ConsoleRecognizer {
    fn start(&mut self) -> Result<(), CapabilityError> {
        if self.active.swap(true, Ordering::AcqRel) {
            return Err(CapabilityError::new("invalid-state"));
        }

        info!(
            language = %self.settings.language,
            continuous = self.settings.continuous,
            "console recognizer listening"
        );
        Ok(())
    }

    fn stop(&mut self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }

        // Engines report the end of the turn asynchronously
        let tx = self.input_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(SessionInput::RecognitionEnd).await;
        });
        debug!("console recognizer stopping");
    }
}

async fn read_console(active: Arc<AtomicBool>, tx: mpsc::Sender<SessionInput>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(?e, "failed to read console input");
                break;
            }
        };

        if !active.load(Ordering::Acquire) {
            debug!("recognizer not started, console input ignored");
            continue;
        }

        let Some(input) = parse_console_line(&line) else {
            continue;
        };
        if matches!(input, SessionInput::RecognitionEnd) {
            active.store(false, Ordering::Release);
        }
        if tx.send(input).await.is_err() {
            break;
        }
    }

    debug!("console input closed");
}

/// Translate one console line into a recognition event
pub(crate) fn parse_console_line(line: &str) -> Option<SessionInput> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if line == "!end" {
        return Some(SessionInput::RecognitionEnd);
    }

    if let Some(rest) = line.strip_prefix("!error") {
        let code = rest.trim();
        if code.is_empty() {
            warn!("'!error' needs a code, e.g. '!error no-speech'");
            return None;
        }
        return Some(SessionInput::RecognitionError(code.to_string()));
    }

    Some(SessionInput::Transcript(line.to_string()))
}
