//! Protocol message definitions for ShellMux.
//!
//! This module defines the message types exchanged between the daemon and
//! the graphical client over the hub socket. Requests flow from the client
//! to the daemon (open/input/resize/close); pushes flow back (data, error
//! and closed notifications tagged with the session id). All messages are
//! serialized using MessagePack.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Envelope wrapper for all protocol messages.
///
/// The envelope provides versioning and sequence numbers for message
/// ordering and compatibility checking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version for compatibility checking.
    pub version: u8,
    /// Sequence number for message ordering.
    pub sequence: u64,
    /// The actual message payload.
    pub payload: Message,
}

impl Envelope {
    /// Create a new envelope with the current protocol version.
    pub fn new(sequence: u64, payload: Message) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sequence,
            payload,
        }
    }

    /// Serialize the envelope to MessagePack bytes.
    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize an envelope from MessagePack bytes.
    ///
    /// Rejects envelopes from an incompatible protocol version.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self> {
        let envelope: Envelope = rmp_serde::from_slice(bytes)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        if envelope.version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion {
                got: envelope.version,
                supported: PROTOCOL_VERSION,
            });
        }
        Ok(envelope)
    }
}

/// Top-level message enum containing all message types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Message {
    // Requests (client -> daemon)
    /// Open a remote (SSH) shell session.
    RemoteOpen(RemoteOpen),
    /// Open a local shell session.
    LocalOpen(LocalOpen),
    /// Terminal input for a session.
    SessionInput(SessionInput),
    /// Terminal resize notification.
    SessionResize(SessionResize),
    /// Close a session.
    SessionClose(SessionClose),

    // Responses and pushes (daemon -> client)
    /// A session was opened successfully.
    SessionOpened(SessionOpened),
    /// Terminal output for a session.
    SessionData(SessionData),
    /// Non-fatal error on a session. The session stays open.
    SessionError(SessionError),
    /// A session ended, either on request or because the underlying
    /// stream closed.
    SessionClosed(SessionClosed),

    // Control messages
    /// Ping for keepalive.
    Ping,
    /// Pong response to ping.
    Pong,
    /// Request-level error.
    Error(ErrorMessage),
}

// ============================================================================
// Requests
// ============================================================================

/// Connection parameters for a remote session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectParams {
    /// Remote host name or address.
    pub host: String,
    /// SSH port.
    pub port: u16,
    /// Login user name.
    pub username: String,
    /// Credential used for authentication.
    pub credential: Credential,
}

/// Authentication credential for a remote session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Credential {
    /// Password authentication.
    Password {
        /// The password.
        password: String,
    },
    /// Private-key file authentication.
    KeyFile {
        /// Path to the private key file on the daemon host.
        path: String,
        /// Optional passphrase for the key.
        passphrase: Option<String>,
    },
}

/// Request to open a remote shell session.
///
/// Connection parameters are given either as a `config_id` resolved
/// against the connection configuration tree, or explicitly via `params`.
/// Exactly one of the two must be present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteOpen {
    /// Id of a connection node in the configuration tree.
    pub config_id: Option<String>,
    /// Explicit connection parameters.
    pub params: Option<ConnectParams>,
    /// Terminal type requested for the pty (default: xterm-256color).
    pub term: Option<String>,
    /// Requested terminal columns.
    pub cols: u16,
    /// Requested terminal rows.
    pub rows: u16,
}

/// Request to open a local shell session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalOpen {
    /// Optional shell command (default: the configured or OS shell).
    pub shell: Option<String>,
    /// Arguments passed to the shell.
    #[serde(default)]
    pub args: Vec<String>,
    /// Requested terminal columns.
    pub cols: u16,
    /// Requested terminal rows.
    pub rows: u16,
    /// Working directory for the session.
    pub cwd: Option<String>,
    /// Additional environment variables.
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

impl Default for LocalOpen {
    fn default() -> Self {
        Self {
            shell: None,
            args: Vec::new(),
            cols: 80,
            rows: 24,
            cwd: None,
            env: Vec::new(),
        }
    }
}

/// Terminal input bytes for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInput {
    /// Target session.
    pub session_id: String,
    /// Raw input bytes, delivered to the shell unmodified.
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

/// Terminal resize notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResize {
    /// Target session.
    pub session_id: String,
    /// New terminal columns.
    pub cols: u16,
    /// New terminal rows.
    pub rows: u16,
}

/// Request to close a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClose {
    /// Target session.
    pub session_id: String,
}

// ============================================================================
// Responses and pushes
// ============================================================================

/// Kind of shell backing a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionKind {
    /// Remote SSH shell.
    Remote,
    /// Local pty shell.
    Local,
}

/// Confirmation that a session was opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOpened {
    /// Id of the new session.
    pub session_id: String,
    /// Kind of the new session.
    pub kind: SessionKind,
}

/// Terminal output bytes from a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    /// Originating session.
    pub session_id: String,
    /// Raw output bytes in arrival order.
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

/// Non-fatal session error notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionError {
    /// Originating session.
    pub session_id: String,
    /// Human-readable error message.
    pub message: String,
}

/// Notification that a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClosed {
    /// The session that ended.
    pub session_id: String,
    /// Optional reason (exit status, remote hangup, explicit close).
    pub reason: Option<String>,
}

// ============================================================================
// Control messages
// ============================================================================

/// Error codes for request-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The referenced session or config node does not exist.
    NotFound,
    /// The request was malformed or not valid in the current state.
    InvalidRequest,
    /// Connecting to the remote host timed out.
    ConnectTimeout,
    /// Authentication was rejected by the remote host.
    AuthFailed,
    /// The remote host could not be reached.
    NetworkUnreachable,
    /// The remote host actively refused the connection.
    ConnectionRefused,
    /// Spawning the local shell failed.
    SpawnFailed,
    /// An internal daemon error occurred.
    InternalError,
}

/// Request-level error sent back to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable error message.
    pub message: String,
    /// Optional context (e.g. the session id the request referenced).
    pub context: Option<String>,
    /// Whether the client may reasonably retry the request.
    pub recoverable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: Message) -> Message {
        let envelope = Envelope::new(7, message);
        let bytes = envelope.to_msgpack().unwrap();
        let decoded = Envelope::from_msgpack(&bytes).unwrap();
        assert_eq!(decoded.version, PROTOCOL_VERSION);
        assert_eq!(decoded.sequence, 7);
        decoded.payload
    }

    #[test]
    fn test_remote_open_roundtrip() {
        let message = Message::RemoteOpen(RemoteOpen {
            config_id: Some("node-42".to_string()),
            params: None,
            term: None,
            cols: 120,
            rows: 40,
        });
        assert_eq!(roundtrip(message.clone()), message);
    }

    #[test]
    fn test_remote_open_with_explicit_params() {
        let message = Message::RemoteOpen(RemoteOpen {
            config_id: None,
            params: Some(ConnectParams {
                host: "example.com".to_string(),
                port: 22,
                username: "deploy".to_string(),
                credential: Credential::KeyFile {
                    path: "/home/deploy/.ssh/id_ed25519".to_string(),
                    passphrase: None,
                },
            }),
            term: Some("xterm-256color".to_string()),
            cols: 80,
            rows: 24,
        });
        assert_eq!(roundtrip(message.clone()), message);
    }

    #[test]
    fn test_session_input_preserves_bytes() {
        let message = Message::SessionInput(SessionInput {
            session_id: "s-1".to_string(),
            data: b"ls\n".to_vec(),
        });
        let decoded = roundtrip(message);
        match decoded {
            Message::SessionInput(input) => assert_eq!(input.data, b"ls\n"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_session_data_binary_safe() {
        let payload: Vec<u8> = (0..=255).collect();
        let message = Message::SessionData(SessionData {
            session_id: "s-2".to_string(),
            data: payload.clone(),
        });
        match roundtrip(message) {
            Message::SessionData(data) => assert_eq!(data.data, payload),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_control_messages_roundtrip() {
        assert_eq!(roundtrip(Message::Ping), Message::Ping);
        assert_eq!(roundtrip(Message::Pong), Message::Pong);

        let error = Message::Error(ErrorMessage {
            code: ErrorCode::AuthFailed,
            message: "authentication failed".to_string(),
            context: None,
            recoverable: false,
        });
        assert_eq!(roundtrip(error.clone()), error);
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut envelope = Envelope::new(1, Message::Ping);
        envelope.version = 99;
        let bytes = rmp_serde::to_vec_named(&envelope).unwrap();

        let result = Envelope::from_msgpack(&bytes);
        assert!(matches!(
            result,
            Err(ProtocolError::UnsupportedVersion { got: 99, .. })
        ));
    }

    #[test]
    fn test_local_open_defaults() {
        let open = LocalOpen::default();
        assert_eq!(open.cols, 80);
        assert_eq!(open.rows, 24);
        assert!(open.shell.is_none());
        assert!(open.env.is_empty());
    }
}
