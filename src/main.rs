//! zone-voice-daemon: continuous voice commands for construction-zone mapping
//!
//! This daemon runs next to the map application and provides:
//! - A restartable, continuous recognition session with permission gating
//! - Keyword interpretation of transcripts into map commands
//! - Spoken acknowledgments (latest utterance wins)
//! - IPC server for status queries, control and command notifications
//!
//! Speech capabilities are pluggable ports; the bundled console recognizer
//! and log synthesizer need no audio hardware.

mod capability;
mod commands;
mod config;
mod error;
mod events;
mod ipc;
mod lifecycle;
mod orchestrator;
mod permission;
mod session;
mod speech;
#[cfg(test)]
mod testing;
mod timer;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::capability::Capabilities;
use crate::commands::CommandDispatcher;
use crate::config::Config;
use crate::events::VoiceEvent;
use crate::ipc::{Server, ServerOptions};
use crate::lifecycle::ShutdownSignal;
use crate::orchestrator::VoiceController;
use crate::permission::PermissionMonitor;
use crate::session::{RecognitionSession, SessionInput};
use crate::speech::ResponseSpeaker;
use crate::timer::TokioTimer;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "zone-voice-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, "configuration loaded");

    let mut shutdown = ShutdownSignal::new()?;

    // Capability callbacks, timers, user actions -> voice controller
    let (input_tx, input_rx) = mpsc::channel::<SessionInput>(64);
    // Voice controller -> IPC server; subscribed now so setup events are seen
    let (event_tx, mut status_rx) = broadcast::channel::<VoiceEvent>(64);

    let permissions = PermissionMonitor::from_probe(config.permission);
    if !permissions.is_supported() {
        warn!("no permission query available, microphone consent reported as unknown");
    }

    let (mut controller, unsupported) = match capability::detect(&config, &input_tx) {
        Ok(caps) => {
            let controller = build_controller(&config, caps, &input_tx, &permissions, &event_tx);
            (Some(controller), None)
        }
        Err(e) => {
            error!(%e, "voice commands disabled");
            let reason = e.to_string();
            let _ = event_tx.send(VoiceEvent::Unsupported {
                reason: reason.clone(),
            });
            (None, Some(reason))
        }
    };

    let server = Server::new(
        &config.socket_path,
        ServerOptions {
            events: event_tx.clone(),
            control: controller.as_ref().map(|_| input_tx.clone()),
            permissions: permissions.clone(),
            unsupported,
        },
    )?;

    if config.autostart && controller.is_some() {
        input_tx
            .send(SessionInput::Start)
            .await
            .context("voice controller input closed")?;
    }

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the voice controller (processes session inputs)
        _ = async {
            match controller.as_mut() {
                Some(controller) => controller.run(input_rx).await,
                None => std::future::pending::<()>().await,
            }
        } => {
            info!("voice controller exited");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Mirror controller status into the IPC server
        _ = async {
            loop {
                match status_rx.recv().await {
                    Ok(VoiceEvent::StatusChanged(status)) => {
                        server.set_status(status).await;
                    }
                    Ok(event) => {
                        info!(%event, "voice event");
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "voice event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            info!("voice event handler exited");
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    if let Some(mut controller) = controller.take() {
        controller.teardown();
    }
    server.shutdown().await;

    info!("zone-voice-daemon stopped");

    Ok(())
}

fn build_controller(
    config: &Config,
    caps: Capabilities,
    input_tx: &mpsc::Sender<SessionInput>,
    permissions: &PermissionMonitor,
    event_tx: &broadcast::Sender<VoiceEvent>,
) -> VoiceController {
    let session = RecognitionSession::new(
        caps.recognizer,
        Box::new(TokioTimer::new(input_tx.clone())),
        permissions.clone(),
        config.session_config(),
    );

    VoiceController::new(
        session,
        ResponseSpeaker::new(caps.synthesizer),
        CommandDispatcher::new(Box::new(event_tx.clone())),
        permissions.clone(),
        event_tx.clone(),
    )
}
