//! Synthesizer that logs utterances instead of playing audio

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info};

use crate::session::SessionInput;

use super::{Synthesizer, UtteranceId};

/// Simulated speaking rate
const PER_WORD: Duration = Duration::from_millis(300);

pub struct LogSynthesizer {
    input_tx: mpsc::Sender<SessionInput>,
    per_word: Duration,
    current: Option<AbortHandle>,
}

impl LogSynthesizer {
    pub fn new(input_tx: mpsc::Sender<SessionInput>) -> Self {
        Self::with_rate(input_tx, PER_WORD)
    }

    pub fn with_rate(input_tx: mpsc::Sender<SessionInput>, per_word: Duration) -> Self {
        Self {
            input_tx,
            per_word,
            current: None,
        }
    }

    fn duration_for(&self, text: &str) -> Duration {
        let words = text.split_whitespace().count().max(1) as u32;
        self.per_word * words
    }
}

impl Synthesizer for LogSynthesizer {
    fn speak(&mut self, id: UtteranceId, text: &str) {
        self.cancel();

        let duration = self.duration_for(text);
        info!(%id, text, "speaking");

        let tx = self.input_tx.clone();
        let task = tokio::spawn(async move {
            let _ = tx.send(SessionInput::SpeechStarted(id)).await;
            tokio::time::sleep(duration).await;
            let _ = tx.send(SessionInput::SpeechEnded(id)).await;
        });
        self.current = Some(task.abort_handle());
    }

    fn cancel(&mut self) {
        if let Some(task) = self.current.take() {
            task.abort();
            debug!("utterance cancelled");
        }
    }
}
