//! # ShellMux Daemon Library
//!
//! This crate provides the daemon (server) functionality for ShellMux,
//! multiplexing interactive shell sessions for a graphical terminal
//! client.
//!
//! ## Overview
//!
//! The daemon owns every shell the client displays:
//!
//! - **Remote sessions**: SSH shells over russh, one channel per session
//! - **Local sessions**: shells spawned on a pseudo-terminal
//! - **Session registry**: concurrent id-to-session map, single owner of
//!   session lifecycle
//! - **Hub server**: Unix socket speaking the framed MessagePack
//!   protocol to the client
//! - **Control IPC**: JSON-newline Unix socket for the CLI
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   Daemon Orchestrator                    │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────┐  ┌──────────────┐  ┌────────────────┐  │
//! │  │   Session   │  │   Session    │  │   Connection   │  │
//! │  │   Manager   │  │   Registry   │  │     Store      │  │
//! │  └─────────────┘  └──────────────┘  └────────────────┘  │
//! │                                                          │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │                 Message Router                     │  │
//! │  └────────────────────────────────────────────────────┘  │
//! │                                                          │
//! │  ┌───────────────────┐  ┌──────────────────────────┐    │
//! │  │    Hub Server     │  │     Control IPC          │    │
//! │  └───────────────────┘  └──────────────────────────┘    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{Config, DaemonOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!
//!     let mut orchestrator = DaemonOrchestrator::new(config)?;
//!     orchestrator.start().await?;
//!
//!     orchestrator.wait_for_shutdown().await;
//!
//!     orchestrator.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`connections`]: Saved connection tree and credential resolution
//! - [`session`]: Shell adapters, registry, relay and manager
//! - [`router`]: Message routing to the session manager
//! - [`hub`]: Unix-socket server for session traffic
//! - [`ipc`]: Control-plane IPC for the CLI
//! - [`orchestrator`]: Main daemon coordinator

pub mod config;
pub mod connections;
pub mod hub;
pub mod ipc;
pub mod orchestrator;
pub mod router;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::Config;

// Re-export connection store types for convenience
pub use connections::{ConnectionNode, ConnectionStore};

// Re-export session types for convenience
pub use session::{
    SessionError, SessionId, SessionManager, SessionRegistry, SessionStatus, SessionSummary,
};

// Re-export router types for convenience
pub use router::{MessageRouter, RouterError, RouterResult};

// Re-export hub types for convenience
pub use hub::{HubError, HubServer};

// Re-export orchestrator types for convenience
pub use orchestrator::{DaemonOrchestrator, OrchestratorState};
