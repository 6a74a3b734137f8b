//! IPC message types for CLI-daemon communication.
//!
//! This module defines the request and response types used for
//! communication between the CLI and the daemon over Unix Domain
//! Sockets.

use serde::{Deserialize, Serialize};

/// Requests that can be sent from the CLI to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcRequest {
    /// Check if the daemon is alive.
    Ping,
    /// Get the current status of the daemon.
    Status,
    /// Request the daemon to stop gracefully.
    Stop,
    /// List all active sessions.
    ListSessions,
    /// Close a specific session by ID.
    CloseSession {
        /// The unique identifier of the session to close.
        session_id: String,
    },
}

/// Responses sent from the daemon to the CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcResponse {
    /// Response to a Ping request.
    Pong,
    /// Current daemon status.
    Status {
        /// Whether the daemon is running.
        running: bool,
        /// Uptime in seconds.
        uptime_secs: u64,
        /// Number of active sessions.
        session_count: usize,
    },
    /// Acknowledgment that the daemon is stopping.
    Stopping,
    /// List of active sessions.
    Sessions {
        /// Information about each active session.
        sessions: Vec<IpcSessionInfo>,
    },
    /// Confirmation that a session was closed.
    SessionClosed {
        /// The ID of the closed session.
        session_id: String,
    },
    /// An error occurred processing the request.
    Error {
        /// Human-readable error message.
        message: String,
    },
}

/// Information about an active session for IPC communication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IpcSessionInfo {
    /// Unique session identifier.
    pub id: String,
    /// Session kind ("remote" or "local").
    pub kind: String,
    /// Hub connection that owns the session.
    pub owner: String,
    /// Current lifecycle status.
    pub status: String,
}
