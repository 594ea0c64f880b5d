//! Unix domain socket server for IPC
//!
//! Provides request-response communication with the host application and
//! pushes command and status events to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::events::{VoiceEvent, VoiceStatus};
use crate::permission::PermissionMonitor;
use crate::session::SessionInput;

use super::protocol::{DaemonStatus, Request, Response};

/// Largest request body accepted
const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// What the server needs from the rest of the daemon
pub struct ServerOptions {
    /// Event bus the voice controller publishes on
    pub events: broadcast::Sender<VoiceEvent>,
    /// Controller input queue; `None` when voice commands are unsupported
    pub control: Option<mpsc::Sender<SessionInput>>,
    pub permissions: PermissionMonitor,
    /// Why voice commands are disabled, if they are
    pub unsupported: Option<String>,
}

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
}

/// State shared with client handlers
struct Shared {
    state: RwLock<ServerState>,
    events: broadcast::Sender<VoiceEvent>,
    control: Option<mpsc::Sender<SessionInput>>,
    permissions: PermissionMonitor,
    unsupported: Option<String>,
}

struct ServerState {
    status: DaemonStatus,
    start_time: Instant,
}

impl Server {
    /// Create a new IPC server
    pub fn new(socket_path: &Path, options: ServerOptions) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let mut status = DaemonStatus::default();
        if let Some(reason) = &options.unsupported {
            status.voice = VoiceStatus::unsupported(reason.clone());
        }

        let shared = Arc::new(Shared {
            state: RwLock::new(ServerState {
                status,
                start_time: Instant::now(),
            }),
            events: options.events,
            control: options.control,
            permissions: options.permissions,
            unsupported: options.unsupported,
        });

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            shared,
            shutdown_tx,
        })
    }

    /// Update the voice status served to clients
    pub async fn set_status(&self, voice: VoiceStatus) {
        let mut state = self.shared.state.write().await;
        if state.status.voice.microphone_status != voice.microphone_status {
            info!(
                from = ?state.status.voice.microphone_status,
                to = ?voice.microphone_status,
                "IPC server: microphone status updated"
            );
        }
        state.status.voice = voice;
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let shared = Arc::clone(&self.shared);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, shared) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    ///
    /// Replies and pushed notifications share one writer task so frames
    /// never interleave.
    async fn handle_client(stream: UnixStream, shared: Arc<Shared>) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();
        let (frame_tx, mut frame_rx) = mpsc::channel::<Vec<u8>>(32);

        let writer_task = tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                if let Err(e) = writer.write_all(&frame).await {
                    debug!(?e, "client write failed");
                    break;
                }
            }
        });

        let mut forwarder = None;
        let result = Self::serve_requests(&mut reader, &shared, &frame_tx, &mut forwarder).await;

        if let Some(task) = forwarder {
            task.abort();
        }
        drop(frame_tx);
        let _ = writer_task.await;

        result
    }

    async fn serve_requests(
        reader: &mut OwnedReadHalf,
        shared: &Shared,
        frame_tx: &mpsc::Sender<Vec<u8>>,
        forwarder: &mut Option<JoinHandle<()>>,
    ) -> Result<()> {
        loop {
            let Some(request) = Self::read_request(reader).await? else {
                return Ok(());
            };
            debug!(?request, "received request");

            let (response, subscribe) = Self::process_request(request, shared).await;
            frame_tx
                .send(encode(&response)?)
                .await
                .context("client writer closed")?;

            if subscribe && forwarder.is_none() {
                if let Some(reason) = &shared.unsupported {
                    let notice = VoiceEvent::Unsupported {
                        reason: reason.clone(),
                    };
                    frame_tx
                        .send(encode(&notice)?)
                        .await
                        .context("client writer closed")?;
                }
                let events = shared.events.subscribe();
                *forwarder = Some(tokio::spawn(forward_events(events, frame_tx.clone())));
                debug!("client subscribed to notifications");
            }
        }
    }

    /// Read one length-prefixed request; `None` when the client is done
    async fn read_request(reader: &mut OwnedReadHalf) -> Result<Option<Request>> {
        let mut len_buf = [0u8; 4];

        // Read message length (4-byte little-endian)
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("client disconnected");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_MESSAGE_LEN {
            warn!(len, "message too large, disconnecting");
            return Ok(None);
        }

        // Read message body
        let mut msg_buf = vec![0u8; len];
        reader.read_exact(&mut msg_buf).await?;

        let request = serde_json::from_slice(&msg_buf).context("failed to parse request")?;
        Ok(Some(request))
    }

    /// Process a request and return a response
    /// Returns (Response, should_subscribe)
    async fn process_request(request: Request, shared: &Shared) -> (Response, bool) {
        match request {
            Request::Ping => (Response::Pong, false),

            Request::GetStatus => {
                let mut state = shared.state.write().await;
                state.status.uptime_secs = state.start_time.elapsed().as_secs();
                (Response::Status(state.status.clone()), false)
            }

            Request::StartListening => (Self::forward(shared, SessionInput::Start).await, false),

            Request::StopListening => (Self::forward(shared, SessionInput::Stop).await, false),

            Request::ReportPermission { state } => {
                if !shared.permissions.is_supported() {
                    let response =
                        Response::error("unsupported", "permission reporting is not enabled");
                    return (response, false);
                }
                shared.permissions.update(state);
                (Response::Accepted, false)
            }

            Request::Subscribe => (Response::Subscribed, true),
        }
    }

    /// Hand a control input to the voice controller
    async fn forward(shared: &Shared, input: SessionInput) -> Response {
        let Some(control) = &shared.control else {
            let reason = shared.unsupported.as_deref().unwrap_or("voice commands unavailable");
            return Response::error("unsupported", reason);
        };

        match control.send(input).await {
            Ok(()) => Response::Accepted,
            Err(_) => Response::error("unavailable", "voice controller is not running"),
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Push bus events to one subscribed client until it goes away
async fn forward_events(
    mut events: broadcast::Receiver<VoiceEvent>,
    frame_tx: mpsc::Sender<Vec<u8>>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let frame = match encode(&event) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(?e, "failed to encode notification");
                        continue;
                    }
                };
                if frame_tx.send(frame).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "notification subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Encode a length-prefixed JSON frame
fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(msg)?;
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandToken;
    use crate::permission::PermissionState;

    fn socket_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("zone-voice-{}-{name}.sock", std::process::id()))
    }

    async fn send(stream: &mut UnixStream, request: &Request) {
        stream.write_all(&encode(request).unwrap()).await.unwrap();
    }

    async fn recv(stream: &mut UnixStream) -> serde_json::Value {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.unwrap();
        let mut body = vec![0u8; u32::from_le_bytes(len_buf) as usize];
        stream.read_exact(&mut body).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn start_server(name: &str, options: ServerOptions) -> (Arc<Server>, PathBuf) {
        let path = socket_path(name);
        let server = Arc::new(Server::new(&path, options).unwrap());
        let running = Arc::clone(&server);
        tokio::spawn(async move {
            let _ = running.run().await;
        });
        (server, path)
    }

    #[test]
    fn test_encode_prefixes_length() {
        let frame = encode(&Response::Pong).unwrap();
        let len = u32::from_le_bytes(frame[..4].try_into().unwrap()) as usize;
        assert_eq!(len, frame.len() - 4);
    }

    #[tokio::test]
    async fn test_ping_and_control() {
        let (events, _) = broadcast::channel(8);
        let (control_tx, mut control_rx) = mpsc::channel(8);
        let (server, path) = start_server(
            "control",
            ServerOptions {
                events,
                control: Some(control_tx),
                permissions: PermissionMonitor::new(PermissionState::Granted),
                unsupported: None,
            },
        );

        let mut client = UnixStream::connect(&path).await.unwrap();
        send(&mut client, &Request::Ping).await;
        assert_eq!(recv(&mut client).await["type"], "pong");

        send(&mut client, &Request::StartListening).await;
        assert_eq!(recv(&mut client).await["type"], "accepted");
        assert_eq!(control_rx.recv().await, Some(SessionInput::Start));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscriber_receives_commands() {
        let (events, _) = broadcast::channel(8);
        let (server, path) = start_server(
            "subscribe",
            ServerOptions {
                events: events.clone(),
                control: None,
                permissions: PermissionMonitor::unsupported(),
                unsupported: None,
            },
        );

        let mut client = UnixStream::connect(&path).await.unwrap();
        send(&mut client, &Request::Subscribe).await;
        assert_eq!(recv(&mut client).await["type"], "subscribed");

        // Round-trip a ping so the forwarder is in place before publishing
        send(&mut client, &Request::Ping).await;
        assert_eq!(recv(&mut client).await["type"], "pong");

        events
            .send(VoiceEvent::Command {
                token: CommandToken::SaveZone,
                params: None,
            })
            .unwrap();
        let frame = recv(&mut client).await;
        assert_eq!(frame["type"], "command");
        assert_eq!(frame["token"], "save-zone");

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsupported_environment() {
        let (events, _) = broadcast::channel(8);
        let (server, path) = start_server(
            "unsupported",
            ServerOptions {
                events,
                control: None,
                permissions: PermissionMonitor::unsupported(),
                unsupported: Some("no speech recognition capability available".to_string()),
            },
        );

        let mut client = UnixStream::connect(&path).await.unwrap();
        send(&mut client, &Request::StartListening).await;
        let reply = recv(&mut client).await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["code"], "unsupported");

        send(&mut client, &Request::GetStatus).await;
        let reply = recv(&mut client).await;
        assert_eq!(reply["voice"]["microphone_status"], "unsupported");

        send(&mut client, &Request::Subscribe).await;
        assert_eq!(recv(&mut client).await["type"], "subscribed");
        assert_eq!(recv(&mut client).await["type"], "unsupported");

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_report_permission_updates_monitor() {
        let (events, _) = broadcast::channel(8);
        let permissions = PermissionMonitor::new(PermissionState::Granted);
        let (server, path) = start_server(
            "permission",
            ServerOptions {
                events,
                control: None,
                permissions: permissions.clone(),
                unsupported: None,
            },
        );

        let mut client = UnixStream::connect(&path).await.unwrap();
        send(
            &mut client,
            &Request::ReportPermission {
                state: PermissionState::Denied,
            },
        )
        .await;
        assert_eq!(recv(&mut client).await["type"], "accepted");
        assert_eq!(permissions.query(), PermissionState::Denied);

        server.shutdown().await;
    }
}
