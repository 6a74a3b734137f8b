//! Daemon orchestrator for wiring together all components.
//!
//! This module provides the `DaemonOrchestrator` that initializes and
//! coordinates the daemon subsystems: configuration, the connection
//! store, session management, message routing, the hub server and the
//! control-plane IPC server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use protocol::messages::SessionKind;

use crate::config::Config;
use crate::connections::ConnectionStore;
use crate::hub::HubServer;
use crate::ipc::{self, IpcRequest, IpcResponse, IpcSessionInfo};
use crate::router::MessageRouter;
use crate::session::{SessionManager, SessionRegistry, SessionStatus, SessionSummary};

/// Daemon orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Initial state, not started.
    Stopped,
    /// Starting up, initializing components.
    Starting,
    /// Running and accepting connections.
    Running,
    /// Shutting down gracefully.
    ShuttingDown,
}

/// Daemon orchestrator that manages all subsystems.
pub struct DaemonOrchestrator {
    config: Config,
    state: Arc<RwLock<OrchestratorState>>,
    session_manager: Arc<SessionManager>,
    router: Arc<MessageRouter>,
    hub_socket: PathBuf,
    ipc_socket: PathBuf,
    started_at: Instant,
    shutdown_token: CancellationToken,
}

impl DaemonOrchestrator {
    /// Creates a new daemon orchestrator.
    pub fn new(config: Config) -> Result<Self> {
        let connections_path = config.connections_path();
        let connections = Arc::new(
            ConnectionStore::load(&connections_path).with_context(|| {
                format!(
                    "Failed to load connection store: {}",
                    connections_path.display()
                )
            })?,
        );
        info!(
            path = %connections_path.display(),
            connections = connections.connection_names().len(),
            "Loaded connection store"
        );

        let registry = Arc::new(SessionRegistry::new());
        let session_manager = Arc::new(SessionManager::new(
            registry,
            config.session.clone(),
            connections,
        ));
        let router = Arc::new(MessageRouter::new(Arc::clone(&session_manager)));

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(OrchestratorState::Stopped)),
            session_manager,
            router,
            hub_socket: ipc::get_hub_socket_path(),
            ipc_socket: ipc::get_socket_path(),
            started_at: Instant::now(),
            shutdown_token: CancellationToken::new(),
        })
    }

    /// Override the socket paths. Used by tests to avoid the shared
    /// runtime directory.
    pub fn with_socket_paths(mut self, hub: PathBuf, ipc: PathBuf) -> Self {
        self.hub_socket = hub;
        self.ipc_socket = ipc;
        self
    }

    /// Returns the current state.
    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    /// Returns the session manager.
    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.session_manager
    }

    /// Returns the shutdown token for external tasks to observe shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Starts the daemon orchestrator.
    pub async fn start(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Stopped {
                anyhow::bail!("Orchestrator is already running");
            }
            *state = OrchestratorState::Starting;
        }

        info!(
            max_sessions = self.config.session.max_sessions,
            "Starting daemon orchestrator"
        );
        self.started_at = Instant::now();

        let hub = HubServer::bind(
            &self.hub_socket,
            Arc::clone(&self.router),
            Arc::clone(&self.session_manager),
        )
        .await
        .with_context(|| format!("Failed to bind hub socket: {}", self.hub_socket.display()))?;
        tokio::spawn(hub.run(self.shutdown_token.clone()));

        let listener = ipc::bind_control_socket(&self.ipc_socket)
            .with_context(|| format!("Failed to bind IPC socket: {}", self.ipc_socket.display()))?;
        let manager = Arc::clone(&self.session_manager);
        let started_at = self.started_at;
        let shutdown = self.shutdown_token.clone();
        tokio::spawn(async move {
            ipc_accept_loop(listener, manager, started_at, shutdown).await;
        });

        {
            let mut state = self.state.write().await;
            *state = OrchestratorState::Running;
        }

        info!("Daemon orchestrator started");
        Ok(())
    }

    /// Waits until a shutdown is requested via IPC or the token.
    pub async fn wait_for_shutdown(&self) {
        self.shutdown_token.cancelled().await;
    }

    /// Stops the daemon orchestrator gracefully.
    ///
    /// Every live session is closed; clean teardown of local shells and
    /// remote channels happens in their adapter tasks before the process
    /// exits.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == OrchestratorState::Stopped {
                return Ok(());
            }
            if *state == OrchestratorState::ShuttingDown {
                anyhow::bail!("Orchestrator is already shutting down");
            }
            *state = OrchestratorState::ShuttingDown;
        }

        info!("Stopping daemon orchestrator");

        self.shutdown_token.cancel();

        for summary in self.session_manager.list() {
            debug!(session_id = %summary.id, "Closing session on shutdown");
            if let Err(e) = self.session_manager.close(&summary.id).await {
                warn!(session_id = %summary.id, error = %e, "Error closing session on shutdown");
            }
        }

        let _ = std::fs::remove_file(&self.hub_socket);
        let _ = std::fs::remove_file(&self.ipc_socket);

        {
            let mut state = self.state.write().await;
            *state = OrchestratorState::Stopped;
        }

        info!("Daemon orchestrator stopped");
        Ok(())
    }
}

/// Accept IPC connections until shutdown.
async fn ipc_accept_loop(
    listener: UnixListener,
    manager: Arc<SessionManager>,
    started_at: Instant,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    tokio::spawn(serve_control_connection(
                        stream,
                        Arc::clone(&manager),
                        started_at,
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    warn!(error = %e, "IPC accept failed");
                }
            },
        }
    }
}

/// Answer control requests on one connection until the peer hangs up.
async fn serve_control_connection(
    stream: UnixStream,
    manager: Arc<SessionManager>,
    started_at: Instant,
    shutdown: CancellationToken,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let request: IpcRequest = match ipc::read_message(&mut reader).await {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "Dropping control connection");
                break;
            }
        };

        let stop_requested = request == IpcRequest::Stop;
        let response = handle_ipc_request(request, &manager, started_at).await;
        if ipc::write_message(&mut write_half, &response).await.is_err() {
            break;
        }
        // Respond first so the CLI sees the ack.
        if stop_requested {
            shutdown.cancel();
            break;
        }
    }
}

/// Handle a single IPC request.
async fn handle_ipc_request(
    request: IpcRequest,
    manager: &Arc<SessionManager>,
    started_at: Instant,
) -> IpcResponse {
    match request {
        IpcRequest::Ping => IpcResponse::Pong,
        IpcRequest::Status => IpcResponse::Status {
            running: true,
            uptime_secs: started_at.elapsed().as_secs(),
            session_count: manager.count(),
        },
        IpcRequest::Stop => IpcResponse::Stopping,
        IpcRequest::ListSessions => IpcResponse::Sessions {
            sessions: manager.list().iter().map(session_info).collect(),
        },
        IpcRequest::CloseSession { session_id } => match manager.close(&session_id).await {
            Ok(_) => IpcResponse::SessionClosed { session_id },
            Err(e) => IpcResponse::Error {
                message: e.to_string(),
            },
        },
    }
}

fn session_info(summary: &SessionSummary) -> IpcSessionInfo {
    IpcSessionInfo {
        id: summary.id.clone(),
        kind: match summary.kind {
            SessionKind::Remote => "remote".to_string(),
            SessionKind::Local => "local".to_string(),
        },
        owner: summary.owner.clone(),
        status: match summary.status {
            SessionStatus::Connecting => "connecting".to_string(),
            SessionStatus::Active => "active".to_string(),
            SessionStatus::Closing => "closing".to_string(),
            SessionStatus::Closed => "closed".to_string(),
            SessionStatus::Errored => "errored".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::ControlClient;
    use protocol::messages::LocalOpen;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn create_test_config(temp_dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.daemon.data_dir = temp_dir.path().to_path_buf();
        config.session.default_shell = "/bin/sh".to_string();
        config
    }

    fn test_orchestrator(temp_dir: &TempDir) -> DaemonOrchestrator {
        let config = create_test_config(temp_dir);
        DaemonOrchestrator::new(config)
            .unwrap()
            .with_socket_paths(
                temp_dir.path().join("hub.sock"),
                temp_dir.path().join("control.sock"),
            )
    }

    #[tokio::test]
    async fn test_orchestrator_creation() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = test_orchestrator(&temp_dir);
        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let temp_dir = TempDir::new().unwrap();
        let mut orchestrator = test_orchestrator(&temp_dir);

        orchestrator.start().await.unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Running);

        // Starting twice is an error.
        assert!(orchestrator.start().await.is_err());

        orchestrator.stop().await.unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);

        // Stopping again is a no-op.
        orchestrator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_ipc_ping_and_status() {
        let temp_dir = TempDir::new().unwrap();
        let mut orchestrator = test_orchestrator(&temp_dir);
        orchestrator.start().await.unwrap();

        let client = ControlClient::new(temp_dir.path().join("control.sock"));
        assert!(client.ping().await);

        match client.request(IpcRequest::Status).await.unwrap() {
            IpcResponse::Status {
                running,
                session_count,
                ..
            } => {
                assert!(running);
                assert_eq!(session_count, 0);
            }
            other => panic!("Expected Status, got {other:?}"),
        }

        orchestrator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_ipc_stop_cancels_shutdown_token() {
        let temp_dir = TempDir::new().unwrap();
        let mut orchestrator = test_orchestrator(&temp_dir);
        orchestrator.start().await.unwrap();

        let client = ControlClient::new(temp_dir.path().join("control.sock"));
        let response = client.request(IpcRequest::Stop).await.unwrap();
        assert_eq!(response, IpcResponse::Stopping);

        tokio::time::timeout(
            std::time::Duration::from_secs(2),
            orchestrator.wait_for_shutdown(),
        )
        .await
        .unwrap();

        orchestrator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_closes_live_sessions() {
        let temp_dir = TempDir::new().unwrap();
        let mut orchestrator = test_orchestrator(&temp_dir);
        orchestrator.start().await.unwrap();

        let (sink, _rx) = mpsc::channel(64);
        let owner = "test-owner".to_string();
        orchestrator
            .session_manager()
            .open_local(&owner, LocalOpen::default(), sink)
            .unwrap();
        assert_eq!(orchestrator.session_manager().count(), 1);

        orchestrator.stop().await.unwrap();
        assert_eq!(orchestrator.session_manager().count(), 0);
    }

    #[tokio::test]
    async fn test_ipc_list_and_close_session() {
        let temp_dir = TempDir::new().unwrap();
        let mut orchestrator = test_orchestrator(&temp_dir);
        orchestrator.start().await.unwrap();

        let (sink, _rx) = mpsc::channel(64);
        let owner = "test-owner".to_string();
        orchestrator
            .session_manager()
            .open_local(&owner, LocalOpen::default(), sink)
            .unwrap();

        let client = ControlClient::new(temp_dir.path().join("control.sock"));

        let session_id = match client.request(IpcRequest::ListSessions).await.unwrap() {
            IpcResponse::Sessions { sessions } => {
                assert_eq!(sessions.len(), 1);
                assert_eq!(sessions[0].kind, "local");
                sessions[0].id.clone()
            }
            other => panic!("Expected Sessions, got {other:?}"),
        };

        let close = IpcRequest::CloseSession {
            session_id: session_id.clone(),
        };
        match client.request(close.clone()).await.unwrap() {
            IpcResponse::SessionClosed { session_id: closed } => {
                assert_eq!(closed, session_id);
            }
            other => panic!("Expected SessionClosed, got {other:?}"),
        }
        assert_eq!(orchestrator.session_manager().count(), 0);

        // Closing again reports the error instead of panicking.
        match client.request(close).await.unwrap() {
            IpcResponse::Error { .. } => {}
            other => panic!("Expected Error, got {other:?}"),
        }

        orchestrator.stop().await.unwrap();
    }
}
