//! Latest-wins wrapper around the speech-output capability
//!
//! A new utterance always cuts off the previous one; nothing is queued.
//! Start/end signals for an utterance that was already superseded are
//! ignored, so `is_speaking` only ever reflects the newest request.

use tracing::debug;

use crate::capability::{Synthesizer, UtteranceId};

pub struct ResponseSpeaker {
    synthesizer: Box<dyn Synthesizer>,
    /// Utterance requested and not yet ended or cancelled
    current: Option<UtteranceId>,
    speaking: bool,
    next_id: u64,
}

impl ResponseSpeaker {
    pub fn new(synthesizer: Box<dyn Synthesizer>) -> Self {
        Self {
            synthesizer,
            current: None,
            speaking: false,
            next_id: 0,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Utterance currently in flight, if any
    pub fn current(&self) -> Option<UtteranceId> {
        self.current
    }

    /// Speak `text`, cancelling whatever is in flight
    pub fn speak(&mut self, text: &str) -> Option<UtteranceId> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        self.cancel_current();

        self.next_id += 1;
        let id = UtteranceId(self.next_id);
        self.current = Some(id);
        self.synthesizer.speak(id, text);
        Some(id)
    }

    /// Cut off the in-flight utterance; no-op when idle
    pub fn cancel_current(&mut self) {
        if let Some(id) = self.current.take() {
            debug!(%id, "cancelling utterance");
            self.synthesizer.cancel();
            self.speaking = false;
        }
    }

    pub fn handle_started(&mut self, id: UtteranceId) {
        if self.current == Some(id) {
            self.speaking = true;
        } else {
            debug!(%id, "start of superseded utterance ignored");
        }
    }

    pub fn handle_ended(&mut self, id: UtteranceId) {
        if self.current == Some(id) {
            self.current = None;
            self.speaking = false;
        } else {
            debug!(%id, "end of superseded utterance ignored");
        }
    }
}
