//! Hub server carrying session traffic to GUI clients.
//!
//! The hub listens on a Unix socket and speaks the framed,
//! MessagePack-encoded protocol from the `protocol` crate. Each client
//! connection gets an owner id and a pair of tasks: a read loop that
//! decodes requests and feeds them to the router, and a write loop that
//! serializes responses and session event pushes back out. When a
//! client disconnects, every session it owns is torn down.

use std::io;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use protocol::framing::{FrameCodec, FRAME_HEADER_SIZE};
use protocol::messages::{
    Envelope, ErrorCode, ErrorMessage, Message, SessionClosed, SessionData,
    SessionError as SessionErrorPush,
};

use crate::router::MessageRouter;
use crate::session::{SessionEvent, SessionManager, SessionPayload};

/// Capacity of the per-connection event channel.
///
/// Sized to absorb output bursts from fast shells without letting a
/// stalled client pin unbounded memory.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the per-connection response channel.
const RESPONSE_CHANNEL_CAPACITY: usize = 64;

/// Errors that can occur in the hub server.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A protocol framing or serialization error occurred.
    #[error("protocol error: {0}")]
    Protocol(#[from] protocol::error::ProtocolError),
}

/// Unix-socket server multiplexing session traffic for all clients.
pub struct HubServer {
    listener: UnixListener,
    router: Arc<MessageRouter>,
    manager: Arc<SessionManager>,
}

impl HubServer {
    /// Bind the hub to the specified socket path.
    ///
    /// Creates parent directories and removes a stale socket file if
    /// one is present.
    pub async fn bind(
        path: &Path,
        router: Arc<MessageRouter>,
        manager: Arc<SessionManager>,
    ) -> Result<Self, HubError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        if path.exists() {
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;
        info!(path = %path.display(), "Hub listening");

        Ok(Self {
            listener,
            router,
            manager,
        })
    }

    /// Accept connections until the shutdown token fires.
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Hub accept loop stopping");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let router = Arc::clone(&self.router);
                        let manager = Arc::clone(&self.manager);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, router, manager, shutdown).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "Hub accept failed");
                    }
                },
            }
        }
    }
}

/// Serve one client connection until it disconnects or shutdown fires.
async fn handle_connection(
    stream: UnixStream,
    router: Arc<MessageRouter>,
    manager: Arc<SessionManager>,
    shutdown: CancellationToken,
) {
    let owner = uuid::Uuid::new_v4().to_string();
    info!(owner = %owner, "Hub client connected");

    let (mut reader, writer) = stream.into_split();
    let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(EVENT_CHANNEL_CAPACITY);
    let (response_tx, response_rx) = mpsc::channel::<Message>(RESPONSE_CHANNEL_CAPACITY);

    // One writer task owns the socket's write half and the outbound
    // sequence counter; responses and pushes are serialized there.
    let conn_done = CancellationToken::new();
    let writer_task = tokio::spawn(write_loop(writer, response_rx, event_rx, conn_done.clone()));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = read_frame(&mut reader) => match frame {
                Ok(Some(payload)) => {
                    let envelope = match Envelope::from_msgpack(&payload) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            warn!(owner = %owner, error = %e, "Undecodable request");
                            let error = Message::Error(ErrorMessage {
                                code: ErrorCode::InvalidRequest,
                                message: e.to_string(),
                                context: None,
                                recoverable: false,
                            });
                            if response_tx.send(error).await.is_err() {
                                break;
                            }
                            continue;
                        }
                    };

                    let context = request_context(&envelope.payload);
                    match router.route(envelope.payload, &owner, &event_tx).await {
                        Ok(Some(response)) => {
                            if response_tx.send(response).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            debug!(owner = %owner, error = %e, "Request failed");
                            let error = Message::Error(e.to_error_message(context));
                            if response_tx.send(error).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                Ok(None) => {
                    debug!(owner = %owner, "Hub client disconnected");
                    break;
                }
                Err(e) => {
                    warn!(owner = %owner, error = %e, "Hub read failed");
                    break;
                }
            },
        }
    }

    // The client is gone; nobody is left to receive closed pushes, so
    // tear the sessions down quietly.
    conn_done.cancel();
    let closed = manager.close_all_for(&owner).await;
    if !closed.is_empty() {
        info!(owner = %owner, count = closed.len(), "Closed sessions of disconnected client");
    }
    let _ = writer_task.await;
}

/// Read one complete frame from the socket.
///
/// Returns `None` on a clean disconnect at a frame boundary.
async fn read_frame(
    reader: &mut tokio::net::unix::OwnedReadHalf,
) -> Result<Option<Vec<u8>>, HubError> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(HubError::Io(e)),
    }

    let (flags, body_len) = FrameCodec::decode_header(&header)?;
    let mut body = vec![0u8; body_len];
    reader.read_exact(&mut body).await?;

    let payload = FrameCodec::decode_payload(flags, &body)?;
    Ok(Some(payload))
}

/// Serialize responses and session events to the socket in order.
async fn write_loop(
    mut writer: tokio::net::unix::OwnedWriteHalf,
    mut responses: mpsc::Receiver<Message>,
    mut events: mpsc::Receiver<SessionEvent>,
    done: CancellationToken,
) {
    let codec = FrameCodec::new();
    let mut sequence: u64 = 0;

    loop {
        let message = tokio::select! {
            _ = done.cancelled() => break,
            response = responses.recv() => match response {
                Some(message) => message,
                None => break,
            },
            event = events.recv() => match event {
                Some(event) => event_to_message(event),
                None => break,
            },
        };

        sequence += 1;
        let envelope = Envelope::new(sequence, message);
        let bytes = match envelope.to_msgpack().and_then(|p| codec.encode(&p)) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Failed to encode outbound message");
                continue;
            }
        };

        if let Err(e) = writer.write_all(&bytes).await {
            debug!(error = %e, "Hub write failed");
            break;
        }
    }
}

/// Map a session event to its push message.
fn event_to_message(event: SessionEvent) -> Message {
    let session_id = event.session_id;
    match event.payload {
        SessionPayload::Data(data) => Message::SessionData(SessionData { session_id, data }),
        SessionPayload::Error(message) => {
            Message::SessionError(SessionErrorPush {
                session_id,
                message,
            })
        }
        SessionPayload::Closed { reason } => {
            Message::SessionClosed(SessionClosed { session_id, reason })
        }
    }
}

/// Best-effort context for error responses.
fn request_context(message: &Message) -> Option<String> {
    match message {
        Message::SessionInput(req) => Some(req.session_id.clone()),
        Message::SessionResize(req) => Some(req.session_id.clone()),
        Message::SessionClose(req) => Some(req.session_id.clone()),
        Message::RemoteOpen(req) => req.config_id.clone(),
        _ => None,
    }
}
