//! CLI-side access to the daemon's control socket.
//!
//! Every request opens a fresh connection, sends one JSON line and
//! waits for one line back. The control plane is low-traffic enough
//! that holding a connection open would buy nothing, and one exchange
//! per connection keeps request and response trivially paired.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::UnixStream;

use super::messages::{IpcRequest, IpcResponse};
use super::wire::{self, IpcError};

/// Default bound on a whole request, connect included.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for the daemon's control socket.
pub struct ControlClient {
    socket: PathBuf,
    timeout: Duration,
}

impl ControlClient {
    /// Client talking to the socket at `socket`.
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send one request and wait for the daemon's reply.
    ///
    /// A connect error usually means the daemon is not running.
    pub async fn request(&self, request: IpcRequest) -> Result<IpcResponse, IpcError> {
        tokio::time::timeout(self.timeout, self.exchange(request))
            .await
            .map_err(|_| {
                IpcError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "control request timed out",
                ))
            })?
    }

    async fn exchange(&self, request: IpcRequest) -> Result<IpcResponse, IpcError> {
        let stream = UnixStream::connect(&self.socket).await?;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        wire::write_message(&mut write_half, &request).await?;
        match wire::read_message(&mut reader).await? {
            Some(response) => Ok(response),
            None => Err(IpcError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "daemon closed the control connection",
            ))),
        }
    }

    /// Whether a daemon answers on the socket.
    pub async fn ping(&self) -> bool {
        matches!(self.request(IpcRequest::Ping).await, Ok(IpcResponse::Pong))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::wire::bind_control_socket;
    use tempfile::tempdir;
    use tokio::net::UnixListener;

    /// One-request server answering with a fixed response.
    fn answer_once(listener: UnixListener, response: IpcResponse) {
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let _request: IpcRequest = wire::read_message(&mut reader).await.unwrap().unwrap();
            wire::write_message(&mut write_half, &response).await.unwrap();
        });
    }

    #[tokio::test]
    async fn test_ping_false_without_daemon() {
        let dir = tempdir().unwrap();
        let client = ControlClient::new(dir.path().join("absent.sock"));
        assert!(!client.ping().await);
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let dir = tempdir().unwrap();
        let socket = dir.path().join("control.sock");
        let listener = bind_control_socket(&socket).unwrap();
        answer_once(listener, IpcResponse::Pong);

        let client = ControlClient::new(&socket);
        assert!(client.ping().await);
    }

    #[tokio::test]
    async fn test_request_response_pairing() {
        let dir = tempdir().unwrap();
        let socket = dir.path().join("control.sock");
        let listener = bind_control_socket(&socket).unwrap();
        answer_once(
            listener,
            IpcResponse::Status {
                running: true,
                uptime_secs: 100,
                session_count: 2,
            },
        );

        let client = ControlClient::new(&socket);
        match client.request(IpcRequest::Status).await.unwrap() {
            IpcResponse::Status {
                running,
                uptime_secs,
                session_count,
            } => {
                assert!(running);
                assert_eq!(uptime_secs, 100);
                assert_eq!(session_count, 2);
            }
            other => panic!("Expected Status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_request_times_out_against_silent_daemon() {
        let dir = tempdir().unwrap();
        let socket = dir.path().join("control.sock");
        let listener = bind_control_socket(&socket).unwrap();

        // Accepts the connection but never answers.
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let client =
            ControlClient::new(&socket).with_timeout(Duration::from_millis(100));
        let result = client.request(IpcRequest::Ping).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_hangup_before_reply_is_an_error() {
        let dir = tempdir().unwrap();
        let socket = dir.path().join("control.sock");
        let listener = bind_control_socket(&socket).unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, _write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let _request: IpcRequest = wire::read_message(&mut reader).await.unwrap().unwrap();
            // Dropping both halves hangs up without replying.
        });

        let client = ControlClient::new(&socket);
        assert!(client.request(IpcRequest::Ping).await.is_err());
    }
}
