//! Deterministic capability doubles shared by unit tests

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::capability::{Recognizer, Synthesizer, UtteranceId};
use crate::commands::{CommandParams, CommandSink, CommandToken};
use crate::error::CapabilityError;
use crate::timer::{Timer, TimerHandle};

#[derive(Debug, Default)]
struct RecognizerLog {
    starts: usize,
    stops: usize,
    fail_start_with: Option<String>,
    panic_on_stop: bool,
}

/// Recognizer that only counts calls
#[derive(Debug, Clone, Default)]
pub struct FakeRecognizer(Arc<Mutex<RecognizerLog>>);

impl FakeRecognizer {
    pub fn starts(&self) -> usize {
        self.0.lock().unwrap().starts
    }

    pub fn stops(&self) -> usize {
        self.0.lock().unwrap().stops
    }

    /// Make every following `start` fail with `code`
    pub fn fail_starts_with(&self, code: &str) {
        self.0.lock().unwrap().fail_start_with = Some(code.to_string());
    }

    pub fn succeed_starts(&self) {
        self.0.lock().unwrap().fail_start_with = None;
    }

    /// Make `stop` panic after counting the call
    pub fn panic_on_stop(&self) {
        self.0.lock().unwrap().panic_on_stop = true;
    }
}

impl Recognizer for FakeRecognizer {
    fn start(&mut self) -> Result<(), CapabilityError> {
        let mut log = self.0.lock().unwrap();
        if let Some(code) = &log.fail_start_with {
            return Err(CapabilityError::new(code.clone()));
        }
        log.starts += 1;
        Ok(())
    }

    fn stop(&mut self) {
        let panic = {
            let mut log = self.0.lock().unwrap();
            log.stops += 1;
            log.panic_on_stop
        };
        if panic {
            panic!("recognizer stop failed");
        }
    }
}

#[derive(Debug, Default)]
struct SynthesizerLog {
    spoken: Vec<(UtteranceId, String)>,
    cancels: usize,
}

/// Synthesizer that records what it was asked to say
#[derive(Debug, Clone, Default)]
pub struct FakeSynthesizer(Arc<Mutex<SynthesizerLog>>);

impl FakeSynthesizer {
    pub fn spoken(&self) -> Vec<(UtteranceId, String)> {
        self.0.lock().unwrap().spoken.clone()
    }

    pub fn last_text(&self) -> Option<String> {
        self.0.lock().unwrap().spoken.last().map(|(_, text)| text.clone())
    }

    pub fn cancels(&self) -> usize {
        self.0.lock().unwrap().cancels
    }
}

impl Synthesizer for FakeSynthesizer {
    fn speak(&mut self, id: UtteranceId, text: &str) {
        self.0.lock().unwrap().spoken.push((id, text.to_string()));
    }

    fn cancel(&mut self) {
        self.0.lock().unwrap().cancels += 1;
    }
}

#[derive(Debug, Default)]
struct TimerLog {
    next_id: u64,
    pending: Vec<(TimerHandle, Duration)>,
    cancelled: Vec<TimerHandle>,
}

/// Timer whose wake-ups are fired by hand
#[derive(Debug, Clone, Default)]
pub struct ManualTimer(Arc<Mutex<TimerLog>>);

impl ManualTimer {
    pub fn pending(&self) -> Vec<(TimerHandle, Duration)> {
        self.0.lock().unwrap().pending.clone()
    }

    pub fn cancelled(&self) -> Vec<TimerHandle> {
        self.0.lock().unwrap().cancelled.clone()
    }

    /// Remove the pending wake-up with `delay` and return its handle
    pub fn fire(&self, delay: Duration) -> Option<TimerHandle> {
        let mut log = self.0.lock().unwrap();
        let index = log.pending.iter().position(|(_, d)| *d == delay)?;
        Some(log.pending.remove(index).0)
    }
}

impl Timer for ManualTimer {
    fn schedule(&mut self, delay: Duration) -> TimerHandle {
        let mut log = self.0.lock().unwrap();
        log.next_id += 1;
        let handle = TimerHandle::new(log.next_id);
        log.pending.push((handle, delay));
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        let mut log = self.0.lock().unwrap();
        log.pending.retain(|(h, _)| *h != handle);
        log.cancelled.push(handle);
    }
}

/// Host sink that records forwarded commands
#[derive(Debug, Clone, Default)]
pub struct RecordingSink(Arc<Mutex<Vec<(CommandToken, Option<CommandParams>)>>>);

impl RecordingSink {
    pub fn delivered(&self) -> Vec<(CommandToken, Option<CommandParams>)> {
        self.0.lock().unwrap().clone()
    }
}

impl CommandSink for RecordingSink {
    fn deliver(&mut self, token: CommandToken, params: Option<&CommandParams>) {
        self.0.lock().unwrap().push((token, params.cloned()));
    }
}
