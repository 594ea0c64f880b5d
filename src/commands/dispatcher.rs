//! Forwarding of interpreted commands to the host application

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::events::VoiceEvent;

use super::history::CommandHistory;
use super::interpreter::{CommandParams, CommandResult, CommandToken};

/// Receives command events on behalf of the host application
pub trait CommandSink: Send {
    fn deliver(&mut self, token: CommandToken, params: Option<&CommandParams>);
}

/// Publishes commands on the daemon's event bus
impl CommandSink for broadcast::Sender<VoiceEvent> {
    fn deliver(&mut self, token: CommandToken, params: Option<&CommandParams>) {
        let event = VoiceEvent::Command {
            token,
            params: params.cloned(),
        };
        if self.send(event).is_err() {
            debug!(%token, "no host listening for commands");
        }
    }
}

/// Records transcripts and forwards actionable commands to the host
pub struct CommandDispatcher {
    sink: Box<dyn CommandSink>,
    history: CommandHistory,
}

impl CommandDispatcher {
    pub fn new(sink: Box<dyn CommandSink>) -> Self {
        Self {
            sink,
            history: CommandHistory::new(),
        }
    }

    /// Record the transcript and forward the command if the host handles it
    pub fn dispatch(&mut self, result: &CommandResult) {
        if result.token.forwards_to_host() {
            info!(token = %result.token, "command dispatched to host");
            self.sink.deliver(result.token, result.params.as_ref());
        } else {
            debug!(token = %result.token, "command not forwarded");
        }
        self.history.push(result.raw_text.clone());
    }

    pub fn history(&self) -> &CommandHistory {
        &self.history
    }
}
