//! The voice controller
//!
//! Drains one input queue and handles every input to completion before the
//! next, so capability callbacks, timer wake-ups and user actions never
//! interleave inside a handler.

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use crate::commands::{interpret, CommandDispatcher};
use crate::events::{VoiceEvent, VoiceStatus};
use crate::permission::{PermissionMonitor, PermissionState};
use crate::session::{ErrorEvent, RecognitionSession, SessionInput, SessionState};
use crate::speech::ResponseSpeaker;

pub struct VoiceController {
    session: RecognitionSession,
    speaker: ResponseSpeaker,
    dispatcher: CommandDispatcher,
    permissions: PermissionMonitor,
    event_tx: broadcast::Sender<VoiceEvent>,
    error_message: Option<String>,
    last_command: Option<String>,
    /// Last snapshot sent on the event bus
    published: Option<VoiceStatus>,
    torn_down: bool,
}

impl VoiceController {
    pub fn new(
        session: RecognitionSession,
        speaker: ResponseSpeaker,
        dispatcher: CommandDispatcher,
        permissions: PermissionMonitor,
        event_tx: broadcast::Sender<VoiceEvent>,
    ) -> Self {
        Self {
            session,
            speaker,
            dispatcher,
            permissions,
            event_tx,
            error_message: None,
            last_command: None,
            published: None,
            torn_down: false,
        }
    }

    /// Run until the input queue closes
    pub async fn run(&mut self, mut input_rx: mpsc::Receiver<SessionInput>) {
        let mut permissions = self.permissions.subscribe();
        info!(permission = %self.permissions.query(), "voice controller started");
        self.publish_status();

        loop {
            tokio::select! {
                input = input_rx.recv() => match input {
                    Some(input) => self.handle(input),
                    None => break,
                },
                Some(state) = permissions.changed() => {
                    self.handle(SessionInput::PermissionChanged(state));
                }
            }
        }

        info!("voice controller stopped");
    }

    /// Handle one input to completion
    pub fn handle(&mut self, input: SessionInput) {
        if self.torn_down {
            debug!(?input, "input after teardown ignored");
            return;
        }
        debug!(?input, "session input");

        match input {
            SessionInput::Start => self.start(),
            SessionInput::Stop => self.session.stop(),
            SessionInput::Transcript(text) => self.handle_transcript(&text),
            SessionInput::RecognitionError(code) => {
                let event = self.session.handle_error(&code);
                self.surface(&event);
            }
            SessionInput::RecognitionEnd => self.session.handle_end(),
            SessionInput::SpeechStarted(id) => self.speaker.handle_started(id),
            SessionInput::SpeechEnded(id) => self.speaker.handle_ended(id),
            SessionInput::PermissionChanged(state) => self.handle_permission(state),
            SessionInput::TimerElapsed(handle) => {
                if let Err(event) = self.session.handle_timer(handle) {
                    self.surface(&event);
                }
            }
        }

        self.publish_status();
    }

    /// Current status snapshot
    pub fn status(&self) -> VoiceStatus {
        VoiceStatus {
            microphone_status: self.session.state().into(),
            is_speaking: self.speaker.is_speaking(),
            last_command: self.last_command.clone(),
            command_history: self.dispatcher.history().to_vec(),
            error_message: self.error_message.clone(),
        }
    }

    /// Release the recognizer, the speaker and any pending restart
    ///
    /// Idempotent. Every release runs even if an earlier one panics.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        info!("tearing down voice session");

        let speech = ReleaseGuard::new(&mut self.speaker, ResponseSpeaker::cancel_current);
        let mut session = ReleaseGuard::new(&mut self.session, RecognitionSession::cancel_restart);
        session.target.stop();
        drop(session);
        drop(speech);
    }

    fn start(&mut self) {
        match self.session.start() {
            Ok(()) => self.error_message = None,
            Err(event) => self.surface(&event),
        }
    }

    fn handle_transcript(&mut self, text: &str) {
        let Some(event) = self.session.handle_result(text) else {
            return;
        };

        let result = interpret(&event.text);
        info!(token = %result.token, text = %result.raw_text, "voice command");

        self.dispatcher.dispatch(&result);
        self.speaker.speak(result.token.acknowledgment());
        self.last_command = Some(result.raw_text);
        self.error_message = None;
        self.session.finish_processing();

        debug!(
            elapsed_ms = event.received_at.elapsed().as_millis() as u64,
            "transcript handled"
        );
    }

    fn handle_permission(&mut self, state: PermissionState) {
        let was_denied = self.session.state() == SessionState::PermissionDenied;
        self.session.handle_permission_change(state);

        match state {
            PermissionState::Denied => self.surface(&ErrorEvent::permission_refused()),
            PermissionState::Granted | PermissionState::Prompt if was_denied => {
                self.error_message = None;
            }
            _ => {}
        }
    }

    fn surface(&mut self, event: &ErrorEvent) {
        if let Some(message) = event.message() {
            self.error_message = Some(message);
        }
    }

    fn publish_status(&mut self) {
        let status = self.status();
        if self.published.as_ref() == Some(&status) {
            return;
        }
        let _ = self.event_tx.send(VoiceEvent::StatusChanged(status.clone()));
        self.published = Some(status);
    }
}

impl Drop for VoiceController {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Runs `release` on the target when dropped, including during unwinding
struct ReleaseGuard<'a, T> {
    target: &'a mut T,
    release: fn(&mut T),
}

impl<'a, T> ReleaseGuard<'a, T> {
    fn new(target: &'a mut T, release: fn(&mut T)) -> Self {
        Self { target, release }
    }
}

impl<T> Drop for ReleaseGuard<'_, T> {
    fn drop(&mut self) {
        (self.release)(self.target);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::commands::CommandToken;
    use crate::events::MicrophoneStatus;
    use crate::session::SessionConfig;
    use crate::testing::{FakeRecognizer, FakeSynthesizer, ManualTimer, RecordingSink};

    const BACKOFF: Duration = Duration::from_millis(100);
    const SETTLE: Duration = Duration::from_millis(1000);

    struct Harness {
        controller: VoiceController,
        recognizer: FakeRecognizer,
        synth: FakeSynthesizer,
        timer: ManualTimer,
        sink: RecordingSink,
        permissions: PermissionMonitor,
        events: broadcast::Receiver<VoiceEvent>,
    }

    fn create_controller() -> Harness {
        let recognizer = FakeRecognizer::default();
        let synth = FakeSynthesizer::default();
        let timer = ManualTimer::default();
        let sink = RecordingSink::default();
        let permissions = PermissionMonitor::new(PermissionState::Granted);
        let (event_tx, events) = broadcast::channel(64);

        let session = RecognitionSession::new(
            Box::new(recognizer.clone()),
            Box::new(timer.clone()),
            permissions.clone(),
            SessionConfig {
                restart_backoff: BACKOFF,
                settle_delay: SETTLE,
                max_start_failures: 5,
            },
        );
        let controller = VoiceController::new(
            session,
            ResponseSpeaker::new(Box::new(synth.clone())),
            CommandDispatcher::new(Box::new(sink.clone())),
            permissions.clone(),
            event_tx,
        );

        Harness {
            controller,
            recognizer,
            synth,
            timer,
            sink,
            permissions,
            events,
        }
    }

    fn listening() -> Harness {
        let mut h = create_controller();
        h.controller.handle(SessionInput::Start);
        assert_eq!(h.controller.status().microphone_status, MicrophoneStatus::Listening);
        h
    }

    #[test]
    fn test_place_cone_scenario() {
        let mut h = listening();
        h.controller
            .handle(SessionInput::Transcript("please place cone here".to_string()));

        let delivered = h.sink.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, CommandToken::PlaceCone);
        assert_eq!(delivered[0].1.as_ref().unwrap()["type"], "warning");
        assert_eq!(
            h.synth.last_text().as_deref(),
            Some("Placing warning cone at current location")
        );

        let status = h.controller.status();
        assert_eq!(status.microphone_status, MicrophoneStatus::Processing);
        assert_eq!(status.last_command.as_deref(), Some("please place cone here"));
        assert_eq!(status.command_history, vec!["please place cone here"]);

        let settle = h.timer.fire(SETTLE).unwrap();
        h.controller.handle(SessionInput::TimerElapsed(settle));
        assert_eq!(h.controller.status().microphone_status, MicrophoneStatus::Listening);
    }

    #[test]
    fn test_weather_scenario() {
        let mut h = listening();
        h.controller
            .handle(SessionInput::Transcript("what's the weather".to_string()));

        assert_eq!(h.sink.delivered()[0].0, CommandToken::CheckWeather);
        assert!(h.synth.last_text().unwrap().contains("weather conditions"));
    }

    #[test]
    fn test_help_scenario() {
        let mut h = listening();
        h.controller
            .handle(SessionInput::Transcript("can you help".to_string()));

        assert!(h.sink.delivered().is_empty());
        assert!(h.synth.last_text().unwrap().starts_with("Available commands"));
        assert_eq!(h.controller.status().command_history, vec!["can you help"]);
    }

    #[test]
    fn test_unrecognized_speaks_fallback() {
        let mut h = listening();
        h.controller
            .handle(SessionInput::Transcript("order a pizza".to_string()));

        assert!(h.sink.delivered().is_empty());
        assert!(h.synth.last_text().unwrap().contains("Say help"));
        assert_eq!(h.controller.status().command_history, vec!["order a pizza"]);
    }

    #[test]
    fn test_rapid_transcripts_cut_off_previous_ack() {
        let mut h = listening();
        h.controller.handle(SessionInput::Transcript("save".to_string()));
        let (first, _) = h.synth.spoken()[0].clone();
        h.controller.handle(SessionInput::SpeechStarted(first));
        assert!(h.controller.status().is_speaking);

        h.controller.handle(SessionInput::Transcript("traffic".to_string()));
        assert_eq!(h.synth.cancels(), 1);
        assert_eq!(h.synth.spoken().len(), 2);
        assert!(!h.controller.status().is_speaking);
    }

    #[test]
    fn test_not_allowed_scenario() {
        let mut h = listening();
        h.controller
            .handle(SessionInput::RecognitionError("not-allowed".to_string()));

        let status = h.controller.status();
        assert_eq!(status.microphone_status, MicrophoneStatus::PermissionDenied);
        assert!(status.error_message.unwrap().contains("Microphone access denied"));
        assert_eq!(h.recognizer.stops(), 1);

        h.controller.handle(SessionInput::RecognitionEnd);
        assert!(h.timer.pending().is_empty());
        assert_eq!(h.recognizer.starts(), 1);
        assert_eq!(
            h.controller.status().microphone_status,
            MicrophoneStatus::PermissionDenied
        );
    }

    #[test]
    fn test_permission_revoked_while_listening() {
        let mut h = listening();
        h.permissions.update(PermissionState::Denied);
        h.controller
            .handle(SessionInput::PermissionChanged(PermissionState::Denied));

        assert_eq!(h.recognizer.stops(), 1);
        h.controller.handle(SessionInput::RecognitionEnd);
        h.controller.handle(SessionInput::RecognitionEnd);
        assert_eq!(h.recognizer.starts(), 1);

        // Explicit start is refused while consent is denied
        h.controller.handle(SessionInput::Start);
        assert_eq!(h.recognizer.starts(), 1);

        h.permissions.update(PermissionState::Granted);
        h.controller
            .handle(SessionInput::PermissionChanged(PermissionState::Granted));
        let status = h.controller.status();
        assert_eq!(status.microphone_status, MicrophoneStatus::Idle);
        assert_eq!(status.error_message, None);
    }

    #[test]
    fn test_denied_while_idle_then_regranted() {
        let mut h = create_controller();
        h.permissions.update(PermissionState::Denied);
        h.controller
            .handle(SessionInput::PermissionChanged(PermissionState::Denied));

        let status = h.controller.status();
        assert_eq!(status.microphone_status, MicrophoneStatus::PermissionDenied);
        assert!(status.error_message.unwrap().contains("Microphone access denied"));

        h.controller.handle(SessionInput::Start);
        assert_eq!(h.recognizer.starts(), 0);
        assert_eq!(
            h.controller.status().microphone_status,
            MicrophoneStatus::PermissionDenied
        );

        h.permissions.update(PermissionState::Granted);
        h.controller
            .handle(SessionInput::PermissionChanged(PermissionState::Granted));
        let status = h.controller.status();
        assert_eq!(status.microphone_status, MicrophoneStatus::Idle);
        assert_eq!(status.error_message, None);

        h.controller.handle(SessionInput::Start);
        assert_eq!(h.recognizer.starts(), 1);
        assert_eq!(h.controller.status().microphone_status, MicrophoneStatus::Listening);
    }

    #[test]
    fn test_start_refused_while_denied_blocks_session() {
        let mut h = create_controller();
        h.permissions.update(PermissionState::Denied);
        h.controller.handle(SessionInput::Start);

        let status = h.controller.status();
        assert_eq!(status.microphone_status, MicrophoneStatus::PermissionDenied);
        assert!(status.error_message.is_some());
        assert_eq!(h.recognizer.starts(), 0);
    }

    #[test]
    fn test_start_failures_surface_give_up_message() {
        let mut h = create_controller();
        h.recognizer.fail_starts_with("network");
        h.controller.handle(SessionInput::Start);

        for _ in 1..5 {
            let restart = h.timer.fire(BACKOFF).unwrap();
            h.controller.handle(SessionInput::TimerElapsed(restart));
        }

        let status = h.controller.status();
        assert_eq!(status.microphone_status, MicrophoneStatus::Idle);
        assert!(status
            .error_message
            .unwrap()
            .starts_with("Speech recognition stopped"));
        assert!(h.timer.pending().is_empty());
    }

    #[test]
    fn test_transient_error_surfaces_message_and_recovers() {
        let mut h = listening();
        h.controller
            .handle(SessionInput::RecognitionError("no-speech".to_string()));
        let status = h.controller.status();
        assert_eq!(status.microphone_status, MicrophoneStatus::Error);
        assert!(status.error_message.is_some());

        h.controller.handle(SessionInput::RecognitionEnd);
        let restart = h.timer.fire(BACKOFF).unwrap();
        h.controller.handle(SessionInput::TimerElapsed(restart));
        assert_eq!(h.recognizer.starts(), 2);

        h.controller.handle(SessionInput::Transcript("optimize".to_string()));
        assert_eq!(h.controller.status().error_message, None);
    }

    #[test]
    fn test_teardown_with_pending_restart() {
        let mut h = listening();
        h.controller.handle(SessionInput::RecognitionEnd);
        let (pending, _) = h.timer.pending()[0];

        h.controller.teardown();
        h.controller.teardown();

        // The engine already reported end, so only the restart needs releasing
        assert_eq!(h.recognizer.stops(), 0);
        assert!(h.timer.pending().is_empty());
        assert!(h.timer.cancelled().contains(&pending));

        h.controller.handle(SessionInput::TimerElapsed(pending));
        h.controller.handle(SessionInput::Start);
        assert_eq!(h.recognizer.starts(), 1);
    }

    #[test]
    fn test_teardown_cancels_speech() {
        let mut h = listening();
        h.controller.handle(SessionInput::Transcript("save".to_string()));
        h.controller.teardown();
        assert_eq!(h.synth.cancels(), 1);
    }

    #[test]
    fn test_teardown_releases_everything_when_stop_panics() {
        let mut h = listening();
        h.recognizer.panic_on_stop();
        h.controller.handle(SessionInput::Transcript("save".to_string()));
        assert_eq!(h.timer.pending().len(), 1);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            h.controller.teardown();
        }));

        assert!(result.is_err());
        assert_eq!(h.recognizer.stops(), 1);
        assert_eq!(h.synth.cancels(), 1);
        assert!(h.timer.pending().is_empty());

        // Already torn down; dropping the controller must not stop again
        drop(h.controller);
        assert_eq!(h.recognizer.stops(), 1);
    }

    #[test]
    fn test_drop_tears_down() {
        let h = listening();
        let recognizer = h.recognizer.clone();
        drop(h);
        assert_eq!(recognizer.stops(), 1);
    }

    #[test]
    fn test_status_published_on_change_only() {
        let mut h = create_controller();
        h.controller.handle(SessionInput::Start);
        h.controller.handle(SessionInput::Start);

        let mut published = Vec::new();
        while let Ok(event) = h.events.try_recv() {
            if let VoiceEvent::StatusChanged(status) = event {
                published.push(status.microphone_status);
            }
        }
        assert_eq!(published, vec![MicrophoneStatus::Listening]);
    }

    #[tokio::test]
    async fn test_run_drains_queue_until_closed() {
        let mut h = create_controller();
        let (tx, rx) = mpsc::channel(8);

        tx.send(SessionInput::Start).await.unwrap();
        tx.send(SessionInput::Transcript("add cone".to_string()))
            .await
            .unwrap();
        drop(tx);

        h.controller.run(rx).await;
        assert_eq!(h.sink.delivered()[0].0, CommandToken::PlaceCone);
        assert_eq!(h.recognizer.starts(), 1);
    }
}
