//! Permission state holder backed by a watch channel

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

/// Microphone consent as reported by the platform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    /// The user allowed microphone access
    Granted,
    /// The user refused microphone access
    Denied,
    /// The platform will ask on first use
    Prompt,
    /// The platform cannot tell us
    #[default]
    Unknown,
}

impl std::fmt::Display for PermissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionState::Granted => write!(f, "granted"),
            PermissionState::Denied => write!(f, "denied"),
            PermissionState::Prompt => write!(f, "prompt"),
            PermissionState::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for PermissionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "granted" => Ok(Self::Granted),
            "denied" => Ok(Self::Denied),
            "prompt" => Ok(Self::Prompt),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown permission state '{other}'")),
        }
    }
}

/// Tracks microphone consent and notifies subscribers of changes
///
/// Cloning is cheap; all clones share the same state. A monitor built with
/// [`PermissionMonitor::unsupported`] always reports `Unknown` and never
/// notifies.
#[derive(Debug, Clone)]
pub struct PermissionMonitor {
    tx: Arc<watch::Sender<PermissionState>>,
    supported: bool,
}

impl PermissionMonitor {
    /// Monitor for a platform that can report consent
    pub fn new(initial: PermissionState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            tx: Arc::new(tx),
            supported: true,
        }
    }

    /// Monitor for a platform without a permission query
    pub fn unsupported() -> Self {
        let (tx, _rx) = watch::channel(PermissionState::Unknown);
        Self {
            tx: Arc::new(tx),
            supported: false,
        }
    }

    /// Build from an optional probe result; `None` means no permission query
    pub fn from_probe(probe: Option<PermissionState>) -> Self {
        match probe {
            Some(state) => Self::new(state),
            None => Self::unsupported(),
        }
    }

    /// Whether the platform can report consent at all
    pub fn is_supported(&self) -> bool {
        self.supported
    }

    /// Current consent state
    pub fn query(&self) -> PermissionState {
        *self.tx.borrow()
    }

    /// Record a consent change reported by the platform
    ///
    /// Returns true when the state actually changed. Unsupported monitors
    /// ignore updates.
    pub fn update(&self, state: PermissionState) -> bool {
        if !self.supported {
            debug!(%state, "permission query unsupported, update ignored");
            return false;
        }

        let changed = self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });

        if changed {
            info!(%state, "microphone permission changed");
        }
        changed
    }

    /// Subscribe to consent changes; dropping the subscription unsubscribes
    pub fn subscribe(&self) -> PermissionSubscription {
        PermissionSubscription {
            rx: self.tx.subscribe(),
        }
    }
}

/// Change feed returned by [`PermissionMonitor::subscribe`]
#[derive(Debug)]
pub struct PermissionSubscription {
    rx: watch::Receiver<PermissionState>,
}

impl PermissionSubscription {
    /// Wait for the next change; `None` once the monitor is gone
    pub async fn changed(&mut self) -> Option<PermissionState> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}
