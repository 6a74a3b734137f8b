//! Session registry: the single source of truth for live sessions.
//!
//! The registry maps session ids to their entries. It is the only
//! shared mutable structure in the session stack; register, lookup and
//! remove are linearizable through the DashMap entry API, so relay
//! callbacks and request handlers can race safely. Handle I/O never
//! happens inside the map's critical sections.

use std::sync::{Arc, Mutex};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use protocol::messages::SessionKind;

use super::handle::ShellHandle;

/// Unique identifier for a session.
pub type SessionId = String;

/// Identifier of the hub client that owns a session.
pub type OwnerId = String;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Connect/spawn in progress.
    Connecting,
    /// The underlying stream is established and relaying.
    Active,
    /// Teardown started; no further writes are applied.
    Closing,
    /// Teardown finished; the id is gone from the registry.
    Closed,
    /// The stream failed; collapses into the same teardown as Closing.
    Errored,
}

/// Registry errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A live entry with this id already exists.
    #[error("duplicate session id: {0}")]
    DuplicateSession(SessionId),
}

/// One live session: its handle, ownership and lifecycle state.
pub struct SessionEntry {
    id: SessionId,
    owner: OwnerId,
    handle: ShellHandle,
    status: Mutex<SessionStatus>,
    relay_cancel: CancellationToken,
}

impl SessionEntry {
    /// Create an entry in the `Connecting` state.
    pub fn new(id: SessionId, owner: OwnerId, handle: ShellHandle) -> Self {
        Self {
            id,
            owner,
            handle,
            status: Mutex::new(SessionStatus::Connecting),
            relay_cancel: CancellationToken::new(),
        }
    }

    /// Session id.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Owning hub client.
    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    /// Kind of shell backing this session.
    pub fn kind(&self) -> SessionKind {
        self.handle.kind()
    }

    /// The command side of the underlying stream.
    pub fn handle(&self) -> &ShellHandle {
        &self.handle
    }

    /// Current lifecycle state.
    pub fn status(&self) -> SessionStatus {
        *self.status.lock().expect("status lock poisoned")
    }

    /// Update the lifecycle state.
    pub fn set_status(&self, status: SessionStatus) {
        *self.status.lock().expect("status lock poisoned") = status;
    }

    /// Mark the session active, unless teardown has already begun.
    pub fn activate(&self) {
        let mut status = self.status.lock().expect("status lock poisoned");
        if *status == SessionStatus::Connecting {
            *status = SessionStatus::Active;
        }
    }

    /// Whether the session accepts writes and resizes.
    pub fn is_writable(&self) -> bool {
        matches!(
            self.status(),
            SessionStatus::Connecting | SessionStatus::Active
        )
    }

    /// Cancellation token detaching the relay before handle disposal.
    pub fn relay_cancel(&self) -> &CancellationToken {
        &self.relay_cancel
    }
}

impl std::fmt::Debug for SessionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEntry")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("kind", &self.kind())
            .field("status", &self.status())
            .finish()
    }
}

/// Concurrency-safe map of live sessions.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<SessionEntry>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Insert a new entry. Fails if the id is already live.
    pub fn register(&self, entry: Arc<SessionEntry>) -> Result<(), RegistryError> {
        match self.sessions.entry(entry.id().clone()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateSession(entry.id().clone())),
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                Ok(())
            }
        }
    }

    /// Look up a live entry.
    pub fn lookup(&self, id: &str) -> Option<Arc<SessionEntry>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove an entry, returning it if it was live.
    ///
    /// Removal is the linearization point of teardown: exactly one
    /// caller gets the entry back, and only that caller emits the
    /// closed notification.
    pub fn remove(&self, id: &str) -> Option<Arc<SessionEntry>> {
        self.sessions.remove(id).map(|(_, entry)| entry)
    }

    /// Whether an id is currently live.
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Number of live sessions.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Visit every live entry.
    pub fn for_each(&self, mut f: impl FnMut(&SessionEntry)) {
        for entry in self.sessions.iter() {
            f(entry.value());
        }
    }

    /// Ids of every live session.
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Ids of the sessions attributed to one owner.
    pub fn ids_for_owner(&self, owner: &str) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|e| e.value().owner() == owner)
            .map(|e| e.key().clone())
            .collect()
    }
}
