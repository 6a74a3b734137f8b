//! Message router for dispatching incoming client requests.
//!
//! This module provides the `MessageRouter` struct that receives
//! protocol messages from a hub connection and routes them to the
//! session manager. Responses flow back as return values; session
//! output and lifecycle pushes flow through the per-connection event
//! sink instead.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use protocol::messages::{
    ErrorCode, ErrorMessage, LocalOpen, Message, RemoteOpen, SessionClose, SessionClosed,
    SessionInput, SessionOpened, SessionResize,
};

use crate::session::{ConnectError, OwnerId, SessionError, SessionEvent, SessionManager, SpawnError};

/// Result type for router operations.
pub type RouterResult = Result<Option<Message>, RouterError>;

/// Errors that can occur during message routing.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// Session-related error.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RouterError {
    /// Convert the error to a protocol ErrorMessage.
    pub fn to_error_message(&self, context: Option<String>) -> ErrorMessage {
        let (code, recoverable) = match self {
            RouterError::Session(e) => match e {
                SessionError::NotFound(_) => (ErrorCode::NotFound, false),
                SessionError::TooManySessions(_) => (ErrorCode::InvalidRequest, true),
                SessionError::UnknownConnection(_) => (ErrorCode::NotFound, false),
                SessionError::MissingTarget => (ErrorCode::InvalidRequest, false),
                SessionError::Registry(_) => (ErrorCode::InternalError, false),
                SessionError::Connect(connect) => match connect {
                    ConnectError::Timeout => (ErrorCode::ConnectTimeout, true),
                    ConnectError::AuthFailed => (ErrorCode::AuthFailed, false),
                    ConnectError::NetworkUnreachable(_) => (ErrorCode::NetworkUnreachable, true),
                    ConnectError::Refused(_) => (ErrorCode::ConnectionRefused, true),
                    ConnectError::Protocol(_) => (ErrorCode::InternalError, true),
                },
                SessionError::Spawn(spawn) => match spawn {
                    SpawnError::ShellNotFound(_) => (ErrorCode::SpawnFailed, false),
                    SpawnError::PermissionDenied(_) => (ErrorCode::SpawnFailed, false),
                    SpawnError::Pty(_) => (ErrorCode::SpawnFailed, true),
                },
            },
            RouterError::InvalidRequest(_) => (ErrorCode::InvalidRequest, false),
        };

        ErrorMessage {
            code,
            message: self.to_string(),
            context,
            recoverable,
        }
    }
}

/// Routes client requests to the session manager.
///
/// One router instance serves all hub connections; per-connection state
/// (owner id and event sink) comes in with each call.
pub struct MessageRouter {
    session_manager: Arc<SessionManager>,
}

impl MessageRouter {
    /// Create a router over the shared session manager.
    pub fn new(session_manager: Arc<SessionManager>) -> Self {
        Self { session_manager }
    }

    /// Route a message to the appropriate handler.
    ///
    /// Returns `Ok(Some(response))` if a response should be sent back,
    /// `Ok(None)` if no response is needed, or `Err(error)` if the
    /// request failed.
    ///
    /// The `owner` identifies the hub connection the message arrived
    /// on; sessions opened here are attributed to it. The `sink` is
    /// that connection's event channel, where session output and close
    /// notifications are pushed.
    pub async fn route(
        &self,
        message: Message,
        owner: &OwnerId,
        sink: &mpsc::Sender<SessionEvent>,
    ) -> RouterResult {
        match message {
            Message::RemoteOpen(req) => self.handle_remote_open(req, owner, sink).await,
            Message::LocalOpen(req) => self.handle_local_open(req, owner, sink),
            Message::SessionInput(req) => self.handle_input(req).await,
            Message::SessionResize(req) => self.handle_resize(req).await,
            Message::SessionClose(req) => self.handle_close(req).await,

            Message::SessionOpened(_)
            | Message::SessionData(_)
            | Message::SessionError(_)
            | Message::SessionClosed(_) => {
                // These are push messages, not requests
                debug!("Ignoring push message received as request");
                Ok(None)
            }

            Message::Ping => Ok(Some(Message::Pong)),
            Message::Pong => {
                debug!("Received pong");
                Ok(None)
            }
            Message::Error(err) => {
                warn!(?err, "Received error from client");
                Ok(None)
            }
        }
    }

    async fn handle_remote_open(
        &self,
        req: RemoteOpen,
        owner: &OwnerId,
        sink: &mpsc::Sender<SessionEvent>,
    ) -> RouterResult {
        info!(
            config_id = ?req.config_id,
            cols = req.cols,
            rows = req.rows,
            "Opening remote session"
        );

        let (session_id, kind) = self
            .session_manager
            .open_remote(owner, req, sink.clone())
            .await?;

        Ok(Some(Message::SessionOpened(SessionOpened {
            session_id,
            kind,
        })))
    }

    fn handle_local_open(
        &self,
        req: LocalOpen,
        owner: &OwnerId,
        sink: &mpsc::Sender<SessionEvent>,
    ) -> RouterResult {
        info!(shell = ?req.shell, cols = req.cols, rows = req.rows, "Opening local session");

        let (session_id, kind) = self
            .session_manager
            .open_local(owner, req, sink.clone())?;

        Ok(Some(Message::SessionOpened(SessionOpened {
            session_id,
            kind,
        })))
    }

    async fn handle_input(&self, req: SessionInput) -> RouterResult {
        // Never an error: input racing a close is dropped in the
        // manager, with a warning for the unknown-id case.
        self.session_manager.write(&req.session_id, req.data).await;
        Ok(None)
    }

    async fn handle_resize(&self, req: SessionResize) -> RouterResult {
        debug!(
            session_id = %req.session_id,
            cols = req.cols,
            rows = req.rows,
            "Resizing session"
        );

        self.session_manager
            .resize(&req.session_id, req.cols, req.rows)
            .await;
        Ok(None)
    }

    async fn handle_close(&self, req: SessionClose) -> RouterResult {
        info!(session_id = %req.session_id, "Closing session");

        self.session_manager.close(&req.session_id).await?;

        // The close winner owns the notification; deliver it as the
        // response so the client sees exactly one SessionClosed.
        Ok(Some(Message::SessionClosed(SessionClosed {
            session_id: req.session_id,
            reason: Some("closed by request".to_string()),
        })))
    }
}
