//! Local shell adapter over a pseudo-terminal.
//!
//! Spawns a shell process on a pty and exposes it as a [`ShellHandle`].
//! Reads happen on blocking tasks because pty readers have no async
//! interface; commands are served by a dedicated task that owns the pty
//! master, the writer and the child process.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use portable_pty::{native_pty_system, Child, CommandBuilder, PtySize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use protocol::messages::SessionKind;

use super::handle::{HandleCommand, HandleEvent, ShellHandle, COMMAND_CAPACITY, EVENT_CAPACITY};

/// Buffer size for reading from the pty.
const READ_BUFFER_SIZE: usize = 4096;

/// Errors that can occur while spawning a local shell.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The requested shell binary does not exist on this host.
    #[error("shell not found: {0}")]
    ShellNotFound(String),

    /// The shell binary exists but is not executable.
    #[error("shell not executable: {0}")]
    PermissionDenied(String),

    /// The pty could not be opened or the process could not be spawned.
    #[error("failed to spawn shell: {0}")]
    Pty(String),
}

/// What to launch and in which environment.
#[derive(Debug, Clone, Default)]
pub struct LocalShellSpec {
    /// Shell command. If None, the platform default is detected.
    pub shell: Option<String>,
    /// Arguments passed to the shell.
    pub args: Vec<String>,
    /// Additional environment variables.
    pub env: Vec<(String, String)>,
    /// Working directory for the shell.
    pub cwd: Option<String>,
}

/// Detects the shell to launch.
///
/// Preference order: the configured shell, then `$SHELL` (or `%COMSPEC%`
/// on Windows), then the platform fallback.
pub fn detect_shell(configured: Option<&str>) -> String {
    if let Some(shell) = configured {
        return shell.to_string();
    }
    if cfg!(windows) {
        return std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string());
    }
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

/// Resolve a shell command to an executable path.
fn resolve_shell(command: &str) -> Result<PathBuf, SpawnError> {
    match which::which(command) {
        Ok(path) => Ok(path),
        Err(_) => {
            // `which` rejects non-executable files; tell those apart
            // from missing ones.
            if Path::new(command).exists() {
                Err(SpawnError::PermissionDenied(command.to_string()))
            } else {
                Err(SpawnError::ShellNotFound(command.to_string()))
            }
        }
    }
}

/// Spawn a local shell on a new pty.
///
/// Returns the command handle and the event stream. The returned handle
/// is live immediately; the shell's first output arrives as
/// [`HandleEvent::Data`].
pub fn spawn(
    spec: &LocalShellSpec,
    cols: u16,
    rows: u16,
) -> Result<(ShellHandle, mpsc::Receiver<HandleEvent>), SpawnError> {
    let shell_cmd = detect_shell(spec.shell.as_deref());
    let shell_path = resolve_shell(&shell_cmd)?;

    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| SpawnError::Pty(e.to_string()))?;

    let mut cmd = CommandBuilder::new(&shell_path);
    cmd.args(&spec.args);
    if let Some(ref dir) = spec.cwd {
        cmd.cwd(dir);
    }
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| SpawnError::Pty(e.to_string()))?;

    let writer = pair
        .master
        .take_writer()
        .map_err(|e| SpawnError::Pty(e.to_string()))?;
    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| SpawnError::Pty(e.to_string()))?;

    tracing::debug!(shell = %shell_path.display(), cols = cols, rows = rows, "Spawned local shell");

    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);

    let child: Arc<Mutex<Box<dyn Child + Send + Sync>>> = Arc::new(Mutex::new(child));
    start_read_loop(reader, Arc::clone(&child), event_tx.clone());
    start_command_loop(cmd_rx, pair.master, writer, child);

    Ok((ShellHandle::new(SessionKind::Local, cmd_tx), event_rx))
}

/// Pump pty output into the event channel on blocking tasks.
///
/// The read loop is the only emitter of [`HandleEvent::Closed`] for a
/// local session: both a natural exit and a kill surface here as EOF
/// (or EIO, which pty masters report once the slave side is gone).
fn start_read_loop(
    reader: Box<dyn Read + Send>,
    child: Arc<Mutex<Box<dyn Child + Send + Sync>>>,
    event_tx: mpsc::Sender<HandleEvent>,
) {
    let reader = Arc::new(std::sync::Mutex::new(reader));

    tokio::spawn(async move {
        loop {
            let reader_clone = Arc::clone(&reader);
            let result = tokio::task::spawn_blocking(move || {
                let mut buffer = vec![0u8; READ_BUFFER_SIZE];
                let mut reader = reader_clone.lock().unwrap();
                match reader.read(&mut buffer) {
                    Ok(0) => Ok(None),
                    Ok(n) => {
                        buffer.truncate(n);
                        Ok(Some(buffer))
                    }
                    Err(e) => Err(e),
                }
            })
            .await;

            match result {
                Ok(Ok(Some(data))) => {
                    if event_tx.send(HandleEvent::Data(data)).await.is_err() {
                        // Nobody is listening anymore.
                        break;
                    }
                }
                Ok(Ok(None)) | Ok(Err(_)) => {
                    let reason = child
                        .lock()
                        .await
                        .try_wait()
                        .ok()
                        .flatten()
                        .map(|status| format!("exit status {}", status.exit_code()));
                    let _ = event_tx.send(HandleEvent::Closed { reason }).await;
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Pty read task panicked");
                    let _ = event_tx.send(HandleEvent::Closed { reason: None }).await;
                    break;
                }
            }
        }
    });
}

/// Serve handle commands against the pty.
fn start_command_loop(
    mut cmd_rx: mpsc::Receiver<HandleCommand>,
    master: Box<dyn portable_pty::MasterPty + Send>,
    mut writer: Box<dyn Write + Send>,
    child: Arc<Mutex<Box<dyn Child + Send + Sync>>>,
) {
    tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                HandleCommand::Write(data) => {
                    if let Err(e) = writer.write_all(&data).and_then(|_| writer.flush()) {
                        tracing::warn!(error = %e, "Pty write failed");
                    }
                }
                HandleCommand::Resize { cols, rows } => {
                    if let Err(e) = master.resize(PtySize {
                        rows,
                        cols,
                        pixel_width: 0,
                        pixel_height: 0,
                    }) {
                        tracing::warn!(error = %e, "Pty resize failed");
                    } else {
                        tracing::debug!(cols = cols, rows = rows, "Resized pty");
                    }
                }
                HandleCommand::Close => break,
            }
        }

        // Killing an already-exited child is a no-op.
        let _ = child.lock().await.kill();
        drop(master);
    });
}
