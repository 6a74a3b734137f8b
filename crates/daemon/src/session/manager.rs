//! Session manager: orchestration of session creation, I/O dispatch
//! and teardown.
//!
//! The manager sits between the hub's request handling and the shell
//! adapters. It owns the policy decisions (capacity, target
//! resolution, race handling) while the registry holds the state and
//! the relays move the bytes.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use protocol::messages::{LocalOpen, RemoteOpen, SessionKind};

use crate::config::SessionConfig;
use crate::connections::ConnectionStore;

use super::handle::HandleError;
use super::local::{self, LocalShellSpec, SpawnError};
use super::registry::{
    OwnerId, RegistryError, SessionEntry, SessionId, SessionRegistry, SessionStatus,
};
use super::relay::{spawn_relay, SessionEvent};
use super::remote::{ConnectError, RemoteConnection};

/// Errors surfaced by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No live session with this id.
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// The configured session limit is reached.
    #[error("session limit reached ({0})")]
    TooManySessions(usize),

    /// The request referenced a connection id the tree does not have,
    /// or one without a stored credential.
    #[error("unknown connection: {0}")]
    UnknownConnection(String),

    /// A remote open request carried neither a config id nor explicit
    /// parameters.
    #[error("remote open needs a config_id or explicit params")]
    MissingTarget,

    /// A freshly generated id collided with a live session.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Establishing the remote connection failed.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Spawning the local shell failed.
    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

/// Snapshot of one live session, for listings.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    /// Session id.
    pub id: SessionId,
    /// Kind of shell.
    pub kind: SessionKind,
    /// Owning client.
    pub owner: OwnerId,
    /// Lifecycle state at snapshot time.
    pub status: SessionStatus,
}

/// Orchestrates sessions against the registry and the shell adapters.
pub struct SessionManager {
    registry: Arc<SessionRegistry>,
    config: SessionConfig,
    connections: Arc<ConnectionStore>,
}

impl SessionManager {
    /// Create a manager over a shared registry and connection store.
    pub fn new(
        registry: Arc<SessionRegistry>,
        config: SessionConfig,
        connections: Arc<ConnectionStore>,
    ) -> Self {
        Self {
            registry,
            config,
            connections,
        }
    }

    /// The shared registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    fn check_capacity(&self) -> Result<(), SessionError> {
        if self.registry.count() >= self.config.max_sessions {
            return Err(SessionError::TooManySessions(self.config.max_sessions));
        }
        Ok(())
    }

    /// Register a freshly opened handle and start its relay.
    fn install(
        &self,
        owner: &str,
        handle: super::handle::ShellHandle,
        events: mpsc::Receiver<super::handle::HandleEvent>,
        sink: mpsc::Sender<SessionEvent>,
    ) -> Result<(SessionId, SessionKind), SessionError> {
        let id = Uuid::new_v4().to_string();
        let kind = handle.kind();
        let entry = Arc::new(SessionEntry::new(id.clone(), owner.to_string(), handle));

        // Random v4 ids do not collide in practice; if one ever does,
        // the open fails cleanly instead of clobbering a live session.
        self.registry.register(Arc::clone(&entry))?;

        spawn_relay(Arc::clone(&self.registry), entry, events, sink);

        tracing::info!(
            session_id = %id,
            kind = ?kind,
            owner = %owner,
            total = self.registry.count(),
            "Session opened"
        );
        Ok((id, kind))
    }

    /// Open a remote SSH session for a client.
    ///
    /// The session id is allocated only after the connection is
    /// established and authenticated, so a failed connect leaves no
    /// trace in the registry.
    pub async fn open_remote(
        &self,
        owner: &str,
        request: RemoteOpen,
        sink: mpsc::Sender<SessionEvent>,
    ) -> Result<(SessionId, SessionKind), SessionError> {
        self.check_capacity()?;

        let params = match (&request.config_id, request.params) {
            (Some(config_id), _) => self
                .connections
                .resolve(config_id)
                .ok_or_else(|| SessionError::UnknownConnection(config_id.clone()))?,
            (None, Some(params)) => params,
            (None, None) => return Err(SessionError::MissingTarget),
        };

        let connection = RemoteConnection::connect(
            &params,
            std::time::Duration::from_secs(self.config.connect_timeout_secs),
        )
        .await?;

        let term = request.term.unwrap_or_else(|| self.config.term.clone());
        let (handle, events) = connection
            .open_shell(
                &term,
                request.cols,
                request.rows,
                !self.config.synthesize_resize,
            )
            .await?;

        self.install(owner, handle, events, sink)
    }

    /// Open a local pty session for a client.
    pub fn open_local(
        &self,
        owner: &str,
        request: LocalOpen,
        sink: mpsc::Sender<SessionEvent>,
    ) -> Result<(SessionId, SessionKind), SessionError> {
        self.check_capacity()?;

        let spec = LocalShellSpec {
            shell: request
                .shell
                .or_else(|| Some(self.config.default_shell.clone())),
            args: request.args,
            env: request.env,
            cwd: request.cwd,
        };
        let (handle, events) = local::spawn(&spec, request.cols, request.rows)?;

        self.install(owner, handle, events, sink)
    }

    /// Deliver input bytes to a session.
    ///
    /// A write racing a close is expected, not exceptional: input for
    /// an id that is gone or closing is dropped with a warning instead
    /// of failing the caller's request.
    pub async fn write(&self, session_id: &str, data: Vec<u8>) {
        let Some(entry) = self.registry.lookup(session_id) else {
            tracing::warn!(session_id = %session_id, "Dropping input for unknown session");
            return;
        };

        if !entry.is_writable() {
            tracing::debug!(session_id = %session_id, "Dropping input for closing session");
            return;
        }

        match entry.handle().write(data).await {
            Ok(()) => {}
            Err(HandleError::InvalidState) => {
                tracing::debug!(session_id = %session_id, "Input raced stream end, dropped");
            }
        }
    }

    /// Propagate a terminal resize to a session. Follows the same
    /// drop-when-racing-a-close policy as `write`.
    pub async fn resize(&self, session_id: &str, cols: u16, rows: u16) {
        let Some(entry) = self.registry.lookup(session_id) else {
            tracing::warn!(session_id = %session_id, "Dropping resize for unknown session");
            return;
        };

        if !entry.is_writable() {
            return;
        }

        match entry.handle().resize(cols, rows).await {
            Ok(()) => {
                tracing::debug!(session_id = %session_id, cols = cols, rows = rows, "Session resized");
            }
            Err(HandleError::InvalidState) => {}
        }
    }

    /// Close a session on request.
    ///
    /// Whoever wins the registry removal owns the closed notification;
    /// the caller of this method must deliver it. The relay is detached
    /// before the handle is disposed, so no stale events leak out of a
    /// closing session.
    pub async fn close(&self, session_id: &str) -> Result<Arc<SessionEntry>, SessionError> {
        let entry = self
            .registry
            .remove(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        entry.set_status(SessionStatus::Closing);
        entry.relay_cancel().cancel();
        entry.handle().close().await;
        entry.set_status(SessionStatus::Closed);

        tracing::info!(
            session_id = %session_id,
            remaining = self.registry.count(),
            "Session closed on request"
        );
        Ok(entry)
    }

    /// Close every session owned by a client. Used when a client
    /// disconnects without closing its sessions first.
    pub async fn close_all_for(&self, owner: &str) -> Vec<SessionId> {
        let ids = self.registry.ids_for_owner(owner);
        let mut closed = Vec::with_capacity(ids.len());
        for id in ids {
            if self.close(&id).await.is_ok() {
                closed.push(id);
            }
        }
        if !closed.is_empty() {
            tracing::info!(owner = %owner, count = closed.len(), "Closed sessions of disconnected client");
        }
        closed
    }

    /// Snapshot of all live sessions.
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut out = Vec::with_capacity(self.registry.count());
        self.registry.for_each(|entry| {
            out.push(SessionSummary {
                id: entry.id().clone(),
                kind: entry.kind(),
                owner: entry.owner().clone(),
                status: entry.status(),
            });
        });
        out
    }

    /// Number of live sessions.
    pub fn count(&self) -> usize {
        self.registry.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::relay::SessionPayload;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::time::timeout;

    fn test_manager(max_sessions: usize) -> SessionManager {
        let dir = std::env::temp_dir().join(format!("shellmux-test-{}", Uuid::new_v4()));
        let connections = Arc::new(
            ConnectionStore::load(dir.join("connections.json")).unwrap(),
        );
        let config = SessionConfig {
            default_shell: "/bin/sh".to_string(),
            max_sessions,
            ..Default::default()
        };
        SessionManager::new(Arc::new(SessionRegistry::new()), config, connections)
    }

    fn local_open(cols: u16, rows: u16) -> LocalOpen {
        LocalOpen {
            cols,
            rows,
            ..Default::default()
        }
    }

    async fn wait_for_data(
        rx: &mut mpsc::Receiver<SessionEvent>,
        needle: &str,
    ) -> bool {
        for _ in 0..50 {
            match timeout(Duration::from_millis(200), rx.recv()).await {
                Ok(Some(event)) => {
                    if let SessionPayload::Data(data) = &event.payload {
                        if String::from_utf8_lossy(data).contains(needle) {
                            return true;
                        }
                    }
                }
                Ok(None) => return false,
                Err(_) => continue,
            }
        }
        false
    }

    #[tokio::test]
    async fn test_open_local_and_echo() {
        let manager = test_manager(8);
        let (sink, mut rx) = mpsc::channel(64);

        let (id, kind) = manager
            .open_local("owner", local_open(80, 24), sink)
            .unwrap();
        assert_eq!(kind, SessionKind::Local);
        assert_eq!(manager.count(), 1);

        manager.write(&id, b"echo manager_marker\n".to_vec()).await;
        assert!(wait_for_data(&mut rx, "manager_marker").await);

        manager.close(&id).await.unwrap();
        assert_eq!(manager.count(), 0);
    }

    #[tokio::test]
    async fn test_open_session_becomes_active() {
        let manager = test_manager(8);
        let (sink, _rx) = mpsc::channel(64);

        let (id, _) = manager.open_local("owner", local_open(80, 24), sink).unwrap();

        // The entry starts connecting; the relay going live flips it.
        let mut status = manager.list()[0].status;
        for _ in 0..50 {
            if status == SessionStatus::Active {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            status = manager.list()[0].status;
        }
        assert_eq!(status, SessionStatus::Active);

        manager.close(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_session_ids_unique() {
        let manager = test_manager(8);
        let (sink, _rx) = mpsc::channel(64);

        let mut ids = HashSet::new();
        for _ in 0..4 {
            let (id, _) = manager
                .open_local("owner", local_open(80, 24), sink.clone())
                .unwrap();
            assert!(ids.insert(id), "session id collided");
        }

        for id in &ids {
            let _ = manager.close(id).await;
        }
    }

    #[tokio::test]
    async fn test_capacity_enforced() {
        let manager = test_manager(1);
        let (sink, _rx) = mpsc::channel(64);

        let (id, _) = manager
            .open_local("owner", local_open(80, 24), sink.clone())
            .unwrap();

        let result = manager.open_local("owner", local_open(80, 24), sink.clone());
        assert!(matches!(result, Err(SessionError::TooManySessions(1))));

        // Closing frees the slot.
        manager.close(&id).await.unwrap();
        let (id2, _) = manager.open_local("owner", local_open(80, 24), sink).unwrap();
        manager.close(&id2).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_unknown_session_is_dropped() {
        let manager = test_manager(8);
        // Nothing to address, nothing to fail: the bytes just vanish.
        manager.write("no-such-id", b"data".to_vec()).await;
        assert_eq!(manager.count(), 0);
    }

    #[tokio::test]
    async fn test_close_unknown_session() {
        let manager = test_manager(8);
        let result = manager.close("no-such-id").await;
        assert!(matches!(result, Err(SessionError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_close_is_exactly_once() {
        let manager = test_manager(8);
        let (sink, _rx) = mpsc::channel(64);

        let (id, _) = manager.open_local("owner", local_open(80, 24), sink).unwrap();

        assert!(manager.close(&id).await.is_ok());
        assert!(matches!(
            manager.close(&id).await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_write_after_close_is_dropped() {
        let manager = test_manager(8);
        let (sink, _rx) = mpsc::channel(64);

        let (id, _) = manager.open_local("owner", local_open(80, 24), sink).unwrap();
        manager.close(&id).await.unwrap();

        // A keystroke racing the shell's exit lands on an id that is
        // already gone; that must stay invisible to the caller.
        manager.write(&id, b"late input\n".to_vec()).await;
        manager.resize(&id, 100, 30).await;
        assert_eq!(manager.count(), 0);
    }

    #[tokio::test]
    async fn test_requested_close_suppresses_relay_notification() {
        let manager = test_manager(8);
        let (sink, mut rx) = mpsc::channel(64);

        let (id, _) = manager.open_local("owner", local_open(80, 24), sink).unwrap();
        let entry = manager.close(&id).await.unwrap();
        assert_eq!(entry.status(), SessionStatus::Closed);

        // Drain anything the relay forwarded before detaching; none of
        // it may be a closed notification, that belongs to the caller.
        loop {
            match timeout(Duration::from_millis(300), rx.recv()).await {
                Ok(Some(event)) => {
                    assert!(!matches!(event.payload, SessionPayload::Closed { .. }));
                }
                Ok(None) | Err(_) => break,
            }
        }
    }

    #[tokio::test]
    async fn test_close_all_for_owner() {
        let manager = test_manager(8);
        let (sink, _rx) = mpsc::channel(64);

        let (a1, _) = manager
            .open_local("alice", local_open(80, 24), sink.clone())
            .unwrap();
        let (a2, _) = manager
            .open_local("alice", local_open(80, 24), sink.clone())
            .unwrap();
        let (b1, _) = manager
            .open_local("bob", local_open(80, 24), sink.clone())
            .unwrap();

        let closed = manager.close_all_for("alice").await;
        assert_eq!(closed.len(), 2);
        assert!(closed.contains(&a1));
        assert!(closed.contains(&a2));

        assert_eq!(manager.count(), 1);
        assert_eq!(manager.list()[0].id, b1);

        manager.close(&b1).await.unwrap();
    }

    #[tokio::test]
    async fn test_resize_live_session() {
        let manager = test_manager(8);
        let (sink, _rx) = mpsc::channel(64);

        let (id, _) = manager.open_local("owner", local_open(80, 24), sink).unwrap();
        manager.resize(&id, 120, 40).await;
        manager.close(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_open_remote_missing_target() {
        let manager = test_manager(8);
        let (sink, _rx) = mpsc::channel(64);

        let request = RemoteOpen {
            config_id: None,
            params: None,
            term: None,
            cols: 80,
            rows: 24,
        };
        let result = manager.open_remote("owner", request, sink).await;
        assert!(matches!(result, Err(SessionError::MissingTarget)));
    }

    #[tokio::test]
    async fn test_open_remote_unknown_config_id() {
        let manager = test_manager(8);
        let (sink, _rx) = mpsc::channel(64);

        let request = RemoteOpen {
            config_id: Some("no-such-entry".to_string()),
            params: None,
            term: None,
            cols: 80,
            rows: 24,
        };
        let result = manager.open_remote("owner", request, sink).await;
        assert!(matches!(result, Err(SessionError::UnknownConnection(_))));
    }

    #[tokio::test]
    async fn test_shell_exit_closes_session() {
        let manager = test_manager(8);
        let (sink, mut rx) = mpsc::channel(64);

        let (id, _) = manager.open_local("owner", local_open(80, 24), sink).unwrap();
        manager.write(&id, b"exit 0\n".to_vec()).await;

        let mut closed = false;
        for _ in 0..50 {
            match timeout(Duration::from_millis(200), rx.recv()).await {
                Ok(Some(event)) => {
                    if matches!(event.payload, SessionPayload::Closed { .. }) {
                        assert_eq!(event.session_id, id);
                        closed = true;
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => continue,
            }
        }
        assert!(closed, "Shell exit did not close the session");
        assert_eq!(manager.count(), 0);
    }
}
