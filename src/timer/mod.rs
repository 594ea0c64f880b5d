//! One-shot wake-ups delivered back onto the controller's input queue
//!
//! A scheduled wake-up arrives as [`SessionInput::TimerElapsed`] carrying the
//! handle returned by `schedule`. Owners compare it with the handle they are
//! waiting for, so a wake-up that raced a cancel is simply ignored.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::session::SessionInput;

/// Identifies one scheduled wake-up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Schedules wake-ups for the recognition session
pub trait Timer: Send {
    /// Deliver `TimerElapsed(handle)` after `delay` unless cancelled first
    fn schedule(&mut self, delay: Duration) -> TimerHandle;

    /// Cancel a pending wake-up. Unknown or already-fired handles are ignored.
    fn cancel(&mut self, handle: TimerHandle);
}

/// Timer backed by tokio sleep tasks
pub struct TokioTimer {
    input_tx: mpsc::Sender<SessionInput>,
    next_id: u64,
    pending: HashMap<TimerHandle, AbortHandle>,
}

impl TokioTimer {
    pub fn new(input_tx: mpsc::Sender<SessionInput>) -> Self {
        Self {
            input_tx,
            next_id: 0,
            pending: HashMap::new(),
        }
    }
}

impl Timer for TokioTimer {
    fn schedule(&mut self, delay: Duration) -> TimerHandle {
        self.next_id += 1;
        let handle = TimerHandle(self.next_id);

        // Forget tasks that already fired
        self.pending.retain(|_, task| !task.is_finished());

        let tx = self.input_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(SessionInput::TimerElapsed(handle)).await;
        });
        self.pending.insert(handle, task.abort_handle());

        debug!(%handle, delay_ms = delay.as_millis() as u64, "timer scheduled");
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        if let Some(task) = self.pending.remove(&handle) {
            task.abort();
            debug!(%handle, "timer cancelled");
        }
    }
}
