//! Remote shell adapter over SSH.
//!
//! Connects to an SSH server, authenticates, opens a shell channel and
//! turns it into a [`ShellHandle`]. The channel and the client handle
//! live inside one I/O task that serves handle commands and pumps
//! channel messages back out as [`HandleEvent`]s, so all SSH I/O stays
//! on a single owner and command ordering is preserved.

use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, AuthResult};
use russh::keys::{load_secret_key, PrivateKeyWithHashAlg};
use russh::{ChannelMsg, Disconnect};
use thiserror::Error;
use tokio::sync::mpsc;

use protocol::messages::{ConnectParams, Credential, SessionKind};

use super::handle::{
    resize_sequence, HandleCommand, HandleEvent, ShellHandle, COMMAND_CAPACITY, EVENT_CAPACITY,
};

/// Errors that can occur while establishing a remote session.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The connection attempt did not complete within the deadline.
    #[error("connection attempt timed out")]
    Timeout,

    /// The server rejected the supplied credential.
    #[error("authentication failed")]
    AuthFailed,

    /// No route to the host.
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    /// The host actively refused the connection.
    #[error("connection refused: {0}")]
    Refused(String),

    /// Any other transport or protocol failure.
    #[error("ssh error: {0}")]
    Protocol(String),
}

/// Map a russh error onto the connect error taxonomy.
fn map_ssh_error(err: russh::Error) -> ConnectError {
    match err {
        russh::Error::IO(io_err) => map_io_error(io_err),
        other => ConnectError::Protocol(other.to_string()),
    }
}

fn map_io_error(err: std::io::Error) -> ConnectError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::ConnectionRefused => ConnectError::Refused(err.to_string()),
        ErrorKind::HostUnreachable | ErrorKind::NetworkUnreachable | ErrorKind::NetworkDown => {
            ConnectError::NetworkUnreachable(err.to_string())
        }
        ErrorKind::TimedOut => ConnectError::Timeout,
        _ => ConnectError::Protocol(err.to_string()),
    }
}

/// Client-side SSH event handler.
///
/// Host keys are accepted unconditionally; known-hosts verification is
/// the responsibility of the client application, which prompts the user
/// before handing the connection parameters to the daemon.
struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// An authenticated SSH connection, ready to open a shell.
pub struct RemoteConnection {
    handle: client::Handle<ClientHandler>,
}

impl RemoteConnection {
    /// Connect and authenticate against an SSH server.
    ///
    /// The deadline covers the TCP connect, the key exchange and the
    /// authentication round trip as a whole.
    pub async fn connect(
        params: &ConnectParams,
        deadline: Duration,
    ) -> Result<Self, ConnectError> {
        let host = params.host.clone();
        let port = params.port;
        tracing::debug!(host = %host, port = port, "Connecting to SSH server");

        tokio::time::timeout(deadline, Self::establish(params))
            .await
            .map_err(|_| ConnectError::Timeout)?
    }

    async fn establish(params: &ConnectParams) -> Result<Self, ConnectError> {
        let config = Arc::new(client::Config::default());
        let mut handle = client::connect(
            config,
            (params.host.as_str(), params.port),
            ClientHandler,
        )
        .await
        .map_err(map_ssh_error)?;

        let auth = match &params.credential {
            Credential::Password { password } => handle
                .authenticate_password(&params.username, password)
                .await
                .map_err(map_ssh_error)?,
            Credential::KeyFile { path, passphrase } => {
                let key = load_secret_key(path, passphrase.as_deref())
                    .map_err(|e| ConnectError::Protocol(e.to_string()))?;
                let hash = handle
                    .best_supported_rsa_hash()
                    .await
                    .map_err(map_ssh_error)?
                    .flatten();
                handle
                    .authenticate_publickey(
                        &params.username,
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash),
                    )
                    .await
                    .map_err(map_ssh_error)?
            }
        };

        match auth {
            AuthResult::Success => {
                tracing::debug!(host = %params.host, user = %params.username, "SSH authentication succeeded");
                Ok(Self { handle })
            }
            AuthResult::Failure { .. } => Err(ConnectError::AuthFailed),
        }
    }

    /// Open a shell channel and hand it to a dedicated I/O task.
    ///
    /// When `native_resize` is false the server's shell does not honor
    /// SSH window-change requests, so resizes are delivered in-band as
    /// the `ESC[8;rows;colst` control sequence instead.
    pub async fn open_shell(
        self,
        term: &str,
        cols: u16,
        rows: u16,
        native_resize: bool,
    ) -> Result<(ShellHandle, mpsc::Receiver<HandleEvent>), ConnectError> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(map_ssh_error)?;
        channel
            .request_pty(false, term, cols as u32, rows as u32, 0, 0, &[])
            .await
            .map_err(map_ssh_error)?;
        channel
            .request_shell(true)
            .await
            .map_err(map_ssh_error)?;

        let (cmd_tx, mut cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let handle = self.handle;

        tokio::spawn(async move {
            let mut exit_status: Option<u32> = None;
            loop {
                tokio::select! {
                    cmd = cmd_rx.recv() => match cmd {
                        Some(HandleCommand::Write(data)) => {
                            if let Err(e) = channel.data(&data[..]).await {
                                let _ = event_tx
                                    .send(HandleEvent::Error(e.to_string()))
                                    .await;
                            }
                        }
                        Some(HandleCommand::Resize { cols, rows }) => {
                            let result = if native_resize {
                                channel
                                    .window_change(cols as u32, rows as u32, 0, 0)
                                    .await
                            } else {
                                let seq = resize_sequence(cols, rows);
                                channel.data(&seq[..]).await
                            };
                            if let Err(e) = result {
                                let _ = event_tx
                                    .send(HandleEvent::Error(e.to_string()))
                                    .await;
                            }
                        }
                        Some(HandleCommand::Close) | None => {
                            let _ = channel.eof().await;
                            break;
                        }
                    },
                    msg = channel.wait() => match msg {
                        Some(ChannelMsg::Data { data }) => {
                            if event_tx.send(HandleEvent::Data(data.to_vec())).await.is_err() {
                                break;
                            }
                        }
                        Some(ChannelMsg::ExtendedData { data, .. }) => {
                            // Stderr from the remote shell is merged into
                            // the session's output stream.
                            if event_tx.send(HandleEvent::Data(data.to_vec())).await.is_err() {
                                break;
                            }
                        }
                        Some(ChannelMsg::ExitStatus { exit_status: code }) => {
                            exit_status = Some(code);
                        }
                        Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                            break;
                        }
                        Some(_) => {}
                    },
                }
            }

            let reason = exit_status.map(|code| format!("exit status {code}"));
            let _ = event_tx.send(HandleEvent::Closed { reason }).await;
            let _ = handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await;
            tracing::debug!("Remote shell I/O task ended");
        });

        Ok((ShellHandle::new(SessionKind::Remote, cmd_tx), event_rx))
    }
}
