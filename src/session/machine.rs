//! Core recognition session state machine
//!
//! The engine reports the end of every recognition turn, whether it ended on
//! its own or because we asked it to stop. `should_restart` records what the
//! user wants and is read synchronously when `end` arrives; it alone decides
//! whether listening resumes.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::capability::Recognizer;
use crate::permission::{PermissionMonitor, PermissionState};
use crate::timer::{Timer, TimerHandle};

use super::classify::{ErrorEvent, ErrorKind};
use super::input::TranscriptEvent;

/// The five possible states of a recognition session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Not listening
    #[default]
    Idle,
    /// Engine running, or about to be restarted
    Listening,
    /// Acting on a transcript
    Processing,
    /// Recoverable engine error, still trying to listen
    Error,
    /// Microphone refused, auto-restart suppressed
    PermissionDenied,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Listening => write!(f, "Listening"),
            SessionState::Processing => write!(f, "Processing"),
            SessionState::Error => write!(f, "Error"),
            SessionState::PermissionDenied => write!(f, "PermissionDenied"),
        }
    }
}

/// Timing knobs for the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Delay between an engine `end` and the automatic restart
    pub restart_backoff: Duration,
    /// How long Processing is shown before returning to Listening
    pub settle_delay: Duration,
    /// Consecutive failed starts tolerated before giving up
    pub max_start_failures: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            restart_backoff: Duration::from_millis(100),
            settle_delay: Duration::from_millis(1000),
            max_start_failures: 5,
        }
    }
}

/// State machine wrapping a continuous recognition capability
pub struct RecognitionSession {
    state: SessionState,
    /// The user wants continuous listening
    should_restart: bool,
    /// A fatal permission error is in effect
    permission_blocked: bool,
    /// `start()` was issued and its `end` has not arrived yet
    engine_active: bool,
    /// `stop()` already issued for the current engine start
    stop_issued: bool,
    start_failures: u32,
    pending_restart: Option<TimerHandle>,
    pending_settle: Option<TimerHandle>,
    state_entered_at: Instant,
    recognizer: Box<dyn Recognizer>,
    timer: Box<dyn Timer>,
    permissions: PermissionMonitor,
    config: SessionConfig,
}

impl RecognitionSession {
    pub fn new(
        recognizer: Box<dyn Recognizer>,
        timer: Box<dyn Timer>,
        permissions: PermissionMonitor,
        config: SessionConfig,
    ) -> Self {
        Self {
            state: SessionState::Idle,
            should_restart: false,
            permission_blocked: false,
            engine_active: false,
            stop_issued: true,
            start_failures: 0,
            pending_restart: None,
            pending_settle: None,
            state_entered_at: Instant::now(),
            recognizer,
            timer,
            permissions,
            config,
        }
    }

    /// Get the current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn should_restart(&self) -> bool {
        self.should_restart
    }

    pub fn has_pending_restart(&self) -> bool {
        self.pending_restart.is_some()
    }

    /// Begin continuous listening
    ///
    /// Refused while consent is denied, which blocks the session. If the
    /// engine has not yet reported the end of its previous turn, only the
    /// restart guard is re-armed and listening resumes through the normal
    /// end/backoff path.
    pub fn start(&mut self) -> Result<(), ErrorEvent> {
        if self.permissions.query() == PermissionState::Denied {
            warn!("start refused, microphone permission denied");
            self.enter_permission_denied();
            return Err(ErrorEvent::permission_refused());
        }

        self.should_restart = true;
        self.permission_blocked = false;
        self.start_failures = 0;

        if self.engine_active {
            debug!(state = %self.state, "engine still running, restart deferred to end event");
            return Ok(());
        }

        self.cancel_restart();
        self.begin_listening()
    }

    /// Stop listening. Idempotent and safe from any state.
    pub fn stop(&mut self) {
        self.halt();

        if !self.engine_active
            && matches!(
                self.state,
                SessionState::Listening | SessionState::Processing | SessionState::Error
            )
        {
            self.transition_to(SessionState::Idle);
        }
    }

    /// Accept a transcript from the engine
    ///
    /// Returns `None` when the transcript is blank or the session is not
    /// listening.
    pub fn handle_result(&mut self, text: &str) -> Option<TranscriptEvent> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        match self.state {
            SessionState::Idle | SessionState::PermissionDenied => {
                debug!(state = %self.state, "transcript dropped, not listening");
                return None;
            }
            SessionState::Error => {
                self.transition_to(SessionState::Listening);
                self.transition_to(SessionState::Processing);
            }
            SessionState::Listening => {
                self.transition_to(SessionState::Processing);
            }
            SessionState::Processing => {
                self.cancel_settle();
            }
        }

        Some(TranscriptEvent::new(text))
    }

    /// The acknowledgment went out; return to Listening after the settle delay
    pub fn finish_processing(&mut self) {
        if self.state != SessionState::Processing {
            return;
        }
        self.cancel_settle();
        self.pending_settle = Some(self.timer.schedule(self.config.settle_delay));
    }

    /// Classify and apply an engine error
    pub fn handle_error(&mut self, code: &str) -> ErrorEvent {
        let event = ErrorEvent::classify(code);
        match event.kind {
            ErrorKind::Permission => {
                warn!(code = %event.raw_code, "recognition refused, microphone permission denied");
            }
            ErrorKind::Transient => {
                warn!(code = %event.raw_code, state = %self.state, "recoverable recognition error");
            }
            ErrorKind::Aborted => {
                debug!("recognition aborted");
            }
        }
        self.apply_error(&event);
        event
    }

    /// The engine finished a recognition turn
    pub fn handle_end(&mut self) {
        self.engine_active = false;
        // Nothing left to stop until the next successful start
        self.stop_issued = true;
        self.cancel_settle();

        if self.should_restart && !self.permission_blocked {
            if self.pending_restart.is_none() {
                self.schedule_restart();
            }
            self.transition_to(SessionState::Listening);
        } else if self.state != SessionState::PermissionDenied {
            self.transition_to(SessionState::Idle);
        }
    }

    /// A scheduled wake-up fired
    ///
    /// Returns the error a restart attempt ran into, if any.
    pub fn handle_timer(&mut self, handle: TimerHandle) -> Result<(), ErrorEvent> {
        if self.pending_restart == Some(handle) {
            self.pending_restart = None;
            return self.restart();
        }

        if self.pending_settle == Some(handle) {
            self.pending_settle = None;
            if self.state == SessionState::Processing {
                self.transition_to(SessionState::Listening);
            }
            return Ok(());
        }

        debug!(%handle, "stale timer ignored");
        Ok(())
    }

    /// React to a consent change reported by the permission monitor
    pub fn handle_permission_change(&mut self, permission: PermissionState) {
        match permission {
            PermissionState::Denied => {
                if self.state != SessionState::PermissionDenied {
                    self.enter_permission_denied();
                }
            }
            PermissionState::Granted | PermissionState::Prompt => {
                if self.state == SessionState::PermissionDenied {
                    info!(%permission, "microphone permission restored");
                    self.permission_blocked = false;
                    self.transition_to(SessionState::Idle);
                }
            }
            PermissionState::Unknown => {}
        }
    }

    /// Cancel a pending automatic restart, if any
    pub fn cancel_restart(&mut self) {
        if let Some(handle) = self.pending_restart.take() {
            self.timer.cancel(handle);
            debug!(%handle, "restart cancelled");
        }
    }

    fn cancel_settle(&mut self) {
        if let Some(handle) = self.pending_settle.take() {
            self.timer.cancel(handle);
        }
    }

    fn schedule_restart(&mut self) {
        let handle = self.timer.schedule(self.config.restart_backoff);
        debug!(
            %handle,
            backoff_ms = self.config.restart_backoff.as_millis() as u64,
            "restart scheduled"
        );
        self.pending_restart = Some(handle);
    }

    /// Clear the guard, drop timers and ask the engine to stop once
    fn halt(&mut self) {
        self.should_restart = false;
        self.cancel_restart();
        self.cancel_settle();

        if !self.stop_issued {
            self.stop_issued = true;
            self.recognizer.stop();
            debug!("recognizer stop requested");
        }
    }

    fn restart(&mut self) -> Result<(), ErrorEvent> {
        if !self.should_restart || self.permission_blocked || self.engine_active {
            return Ok(());
        }

        if self.permissions.query() == PermissionState::Denied {
            self.enter_permission_denied();
            return Err(ErrorEvent::permission_refused());
        }

        self.begin_listening()
    }

    fn begin_listening(&mut self) -> Result<(), ErrorEvent> {
        match self.recognizer.start() {
            Ok(()) => {
                self.engine_active = true;
                self.stop_issued = false;
                self.start_failures = 0;
                self.transition_to(SessionState::Listening);
                Ok(())
            }
            Err(err) => {
                let event = ErrorEvent::classify(&err.code);
                warn!(code = %event.raw_code, "recognizer failed to start");

                if event.kind == ErrorKind::Permission {
                    self.enter_permission_denied();
                    return Err(event);
                }

                self.start_failures += 1;
                if self.start_failures >= self.config.max_start_failures {
                    warn!(
                        failures = self.start_failures,
                        "recognizer keeps failing to start, giving up"
                    );
                    self.stop();
                    return Err(event.mark_gave_up());
                }

                self.schedule_restart();
                self.transition_to(SessionState::Listening);
                Err(event)
            }
        }
    }

    fn apply_error(&mut self, event: &ErrorEvent) {
        match event.kind {
            ErrorKind::Permission => self.enter_permission_denied(),
            ErrorKind::Transient => {
                if matches!(self.state, SessionState::Listening | SessionState::Processing) {
                    self.transition_to(SessionState::Error);
                }
            }
            ErrorKind::Aborted => {}
        }
    }

    fn enter_permission_denied(&mut self) {
        self.permission_blocked = true;
        self.halt();
        self.transition_to(SessionState::PermissionDenied);
    }

    /// Perform a state transition along an allowed edge
    fn transition_to(&mut self, new_state: SessionState) {
        let old_state = self.state;
        if old_state == new_state {
            return;
        }

        if !is_valid_transition(old_state, new_state) {
            warn!(from = %old_state, to = %new_state, "invalid session transition refused");
            return;
        }

        let duration_ms = self.state_entered_at.elapsed().as_millis() as u64;
        info!(
            from = %old_state,
            to = %new_state,
            duration_ms = duration_ms,
            "session transition"
        );

        self.state = new_state;
        self.state_entered_at = Instant::now();
    }
}

fn is_valid_transition(from: SessionState, to: SessionState) -> bool {
    use SessionState::*;

    matches!(
        (from, to),
        // Start, settle, and end-with-restart all land in Listening
        (_, Listening)
            | (Listening, Processing)
            | (Listening | Processing, Error)
            | (Idle | Listening | Processing | Error, PermissionDenied)
            | (Listening | Processing | Error, Idle)
            | (PermissionDenied, Idle)
    )
}
