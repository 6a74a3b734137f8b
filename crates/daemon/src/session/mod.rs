//! Session management module.
//!
//! This module provides the shell adapters, the session registry and
//! the orchestration on top of them. Sessions are duplex byte streams:
//! remote SSH shells and local pty shells, multiplexed through one
//! daemon process.

pub mod handle;
pub mod local;
pub mod manager;
pub mod registry;
pub mod relay;
pub mod remote;

pub use handle::{HandleEvent, ShellHandle};
pub use local::{LocalShellSpec, SpawnError};
pub use manager::{SessionError, SessionManager, SessionSummary};
pub use registry::{OwnerId, SessionEntry, SessionId, SessionRegistry, SessionStatus};
pub use relay::{SessionEvent, SessionPayload};
pub use remote::{ConnectError, RemoteConnection};
