//! Shell handle abstraction shared by the remote and local adapters.
//!
//! A [`ShellHandle`] is the command side of one underlying shell stream.
//! Each adapter owns its real resources (SSH channel or pty) inside a
//! dedicated I/O task and consumes [`HandleCommand`]s from an ordered
//! channel, so a write accepted before a close is always applied before
//! the close and no lock is ever held across handle I/O. Output and
//! lifecycle events flow back out as [`HandleEvent`]s.

use thiserror::Error;
use tokio::sync::mpsc;

use protocol::messages::SessionKind;

/// Capacity of the per-handle command channel.
pub(crate) const COMMAND_CAPACITY: usize = 64;

/// Capacity of the per-handle event channel.
pub(crate) const EVENT_CAPACITY: usize = 256;

/// Errors surfaced by handle operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandleError {
    /// The handle's I/O task has terminated; the stream is gone.
    #[error("shell handle is closed")]
    InvalidState,
}

/// Commands applied to the underlying stream, in submission order.
#[derive(Debug)]
pub enum HandleCommand {
    /// Write raw bytes to the shell's input.
    Write(Vec<u8>),
    /// Resize the terminal.
    Resize {
        /// New terminal columns.
        cols: u16,
        /// New terminal rows.
        rows: u16,
    },
    /// Close the stream and end the I/O task.
    Close,
}

/// Events published by an adapter's I/O task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleEvent {
    /// Output bytes from the shell, in arrival order.
    Data(Vec<u8>),
    /// A stream-level error. Does not end the session by itself.
    Error(String),
    /// The stream ended (EOF, remote hangup or process exit).
    Closed {
        /// Optional human-readable reason.
        reason: Option<String>,
    },
}

/// Command side of one underlying shell stream.
///
/// Cloneable and cheap; all clones feed the same ordered command
/// channel. Once the I/O task exits, every operation returns
/// [`HandleError::InvalidState`].
#[derive(Debug, Clone)]
pub struct ShellHandle {
    kind: SessionKind,
    cmd_tx: mpsc::Sender<HandleCommand>,
}

impl ShellHandle {
    /// Create a handle from its command channel.
    pub(crate) fn new(kind: SessionKind, cmd_tx: mpsc::Sender<HandleCommand>) -> Self {
        Self { kind, cmd_tx }
    }

    /// Kind of shell behind this handle.
    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// Write raw bytes to the shell's input.
    ///
    /// May wait briefly when the stream applies backpressure.
    pub async fn write(&self, data: Vec<u8>) -> Result<(), HandleError> {
        self.cmd_tx
            .send(HandleCommand::Write(data))
            .await
            .map_err(|_| HandleError::InvalidState)
    }

    /// Resize the terminal behind this handle.
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), HandleError> {
        self.cmd_tx
            .send(HandleCommand::Resize { cols, rows })
            .await
            .map_err(|_| HandleError::InvalidState)
    }

    /// Request the stream to close. Closing an already-closed handle is
    /// a no-op.
    pub async fn close(&self) {
        let _ = self.cmd_tx.send(HandleCommand::Close).await;
    }

    /// Whether the I/O task behind this handle has terminated.
    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }
}

/// Terminal-resize control sequence for streams without a native
/// window-change primitive: `ESC [ 8 ; rows ; cols t`.
pub fn resize_sequence(cols: u16, rows: u16) -> Vec<u8> {
    format!("\x1b[8;{rows};{cols}t").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_sequence_exact_bytes() {
        assert_eq!(resize_sequence(120, 40), b"\x1b[8;40;120t".to_vec());
    }

    #[test]
    fn test_resize_sequence_small_terminal() {
        assert_eq!(resize_sequence(80, 24), b"\x1b[8;24;80t".to_vec());
    }

    #[tokio::test]
    async fn test_commands_delivered_in_order() {
        let (tx, mut rx) = mpsc::channel(COMMAND_CAPACITY);
        let handle = ShellHandle::new(SessionKind::Local, tx);

        handle.write(b"first".to_vec()).await.unwrap();
        handle.resize(100, 30).await.unwrap();
        handle.write(b"second".to_vec()).await.unwrap();

        assert!(matches!(rx.recv().await, Some(HandleCommand::Write(d)) if d == b"first"));
        assert!(matches!(
            rx.recv().await,
            Some(HandleCommand::Resize { cols: 100, rows: 30 })
        ));
        assert!(matches!(rx.recv().await, Some(HandleCommand::Write(d)) if d == b"second"));
    }

    #[tokio::test]
    async fn test_write_after_close_is_invalid_state() {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let handle = ShellHandle::new(SessionKind::Remote, tx);

        drop(rx);
        assert!(handle.is_closed());
        assert_eq!(
            handle.write(b"late".to_vec()).await,
            Err(HandleError::InvalidState)
        );
        assert_eq!(handle.resize(80, 24).await, Err(HandleError::InvalidState));

        // Close after close must not error.
        handle.close().await;
    }
}
