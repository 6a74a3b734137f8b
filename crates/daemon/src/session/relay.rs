//! Stream relay: per-session forwarding of shell output and lifecycle
//! events toward the owning client.
//!
//! One relay task runs per session. It consumes the adapter's event
//! stream and forwards it, tagged with the session id, into the hub's
//! event sink. When the underlying stream ends, the relay races any
//! concurrent close request through registry removal; whoever wins the
//! removal emits the single closed notification.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::handle::HandleEvent;
use super::registry::{OwnerId, SessionEntry, SessionId, SessionRegistry, SessionStatus};

/// Payload of a relayed session event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPayload {
    /// Output bytes from the shell.
    Data(Vec<u8>),
    /// A non-fatal stream error. The session stays open.
    Error(String),
    /// The session ended. Emitted exactly once per session.
    Closed {
        /// Optional human-readable reason.
        reason: Option<String>,
    },
}

/// A session event addressed to its owning client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    /// Which session produced the event.
    pub session_id: SessionId,
    /// Which client owns that session.
    pub owner: OwnerId,
    /// What happened.
    pub payload: SessionPayload,
}

impl SessionEvent {
    fn new(entry: &SessionEntry, payload: SessionPayload) -> Self {
        Self {
            session_id: entry.id().clone(),
            owner: entry.owner().clone(),
            payload,
        }
    }
}

/// Start the relay task for a registered session.
///
/// The task runs until the adapter's event stream ends, the sink goes
/// away, or the entry's relay token is cancelled. Cancellation detaches
/// the relay without emitting anything; the canceller is then
/// responsible for the closed notification.
pub fn spawn_relay(
    registry: Arc<SessionRegistry>,
    entry: Arc<SessionEntry>,
    mut events: mpsc::Receiver<HandleEvent>,
    sink: mpsc::Sender<SessionEvent>,
) {
    let cancel = entry.relay_cancel().clone();

    tokio::spawn(async move {
        // The relay going live is what turns a connecting session
        // active; a close that won the race beforehand stays won.
        entry.activate();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(session_id = %entry.id(), "Relay detached");
                    break;
                }
                event = events.recv() => match event {
                    Some(HandleEvent::Data(data)) => {
                        if sink.send(SessionEvent::new(&entry, SessionPayload::Data(data))).await.is_err() {
                            tracing::debug!(session_id = %entry.id(), "Event sink closed, relay ending");
                            break;
                        }
                    }
                    Some(HandleEvent::Error(message)) => {
                        tracing::warn!(session_id = %entry.id(), error = %message, "Session stream error");
                        if sink.send(SessionEvent::new(&entry, SessionPayload::Error(message))).await.is_err() {
                            break;
                        }
                    }
                    Some(HandleEvent::Closed { reason }) => {
                        finish(&registry, &entry, &sink, reason, SessionStatus::Closed).await;
                        break;
                    }
                    None => {
                        // The adapter dropped its event channel without
                        // an orderly close; the stream failed.
                        finish(&registry, &entry, &sink, None, SessionStatus::Errored).await;
                        break;
                    }
                },
            }
        }
    });
}

/// Terminal step of a relay: remove the session and, if this relay won
/// the removal, emit the closed notification. `terminal` records
/// whether the stream ended in order or failed.
async fn finish(
    registry: &SessionRegistry,
    entry: &SessionEntry,
    sink: &mpsc::Sender<SessionEvent>,
    reason: Option<String>,
    terminal: SessionStatus,
) {
    if registry.remove(entry.id()).is_some() {
        entry.set_status(terminal);
        tracing::info!(session_id = %entry.id(), reason = ?reason, "Session closed by stream end");
        let _ = sink
            .send(SessionEvent::new(entry, SessionPayload::Closed { reason }))
            .await;
    } else {
        // Someone else removed the session and owns the notification.
        tracing::debug!(session_id = %entry.id(), "Session already removed, skipping closed event");
    }
}
