//! Wire format of the control socket.
//!
//! Control traffic is newline-delimited JSON in both directions, so one
//! read helper and one write helper serve the daemon side and the CLI
//! side alike. Framing this simple keeps the socket inspectable with
//! `nc -U` when debugging.

use std::io;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixListener;

/// Errors in control-socket communication.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// The socket read or write failed.
    #[error("control socket i/o failed: {0}")]
    Io(#[from] io::Error),

    /// The peer sent something that is not a control message.
    #[error("malformed control message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Bind the control listener, replacing any stale socket file left by
/// a previous daemon.
pub fn bind_control_socket(path: &Path) -> io::Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    UnixListener::bind(path)
}

/// Read one JSON line from the peer. `None` means the peer hung up.
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>, IpcError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line.trim())?))
}

/// Write one value to the peer as a JSON line.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::messages::{IpcRequest, IpcResponse};
    use tokio::io::BufReader;
    use tokio::net::UnixStream;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_bind_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let socket = dir.path().join("nested").join("run").join("control.sock");

        let _listener = bind_control_socket(&socket).unwrap();
        assert!(socket.exists());
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let dir = tempdir().unwrap();
        let socket = dir.path().join("control.sock");

        drop(bind_control_socket(&socket).unwrap());
        // The old socket file is still on disk; a new bind must win.
        let _listener = bind_control_socket(&socket).unwrap();
        assert!(socket.exists());
    }

    #[tokio::test]
    async fn test_message_roundtrip_over_stream_pair() {
        let (client, server) = UnixStream::pair().unwrap();
        let (client_read, mut client_write) = client.into_split();
        let (server_read, mut server_write) = server.into_split();
        let mut client_read = BufReader::new(client_read);
        let mut server_read = BufReader::new(server_read);

        write_message(&mut client_write, &IpcRequest::Ping).await.unwrap();
        let request: IpcRequest = read_message(&mut server_read).await.unwrap().unwrap();
        assert_eq!(request, IpcRequest::Ping);

        write_message(&mut server_write, &IpcResponse::Pong).await.unwrap();
        let response: IpcResponse = read_message(&mut client_read).await.unwrap().unwrap();
        assert_eq!(response, IpcResponse::Pong);
    }

    #[tokio::test]
    async fn test_read_none_when_peer_hangs_up() {
        let (client, server) = UnixStream::pair().unwrap();
        drop(client);

        let (server_read, _server_write) = server.into_split();
        let mut server_read = BufReader::new(server_read);
        let request: Option<IpcRequest> = read_message(&mut server_read).await.unwrap();
        assert!(request.is_none());
    }

    #[tokio::test]
    async fn test_garbage_line_is_malformed() {
        let (client, server) = UnixStream::pair().unwrap();
        let (_client_read, mut client_write) = client.into_split();
        let (server_read, _server_write) = server.into_split();
        let mut server_read = BufReader::new(server_read);

        client_write.write_all(b"not json\n").await.unwrap();
        let result: Result<Option<IpcRequest>, _> = read_message(&mut server_read).await;
        assert!(matches!(result, Err(IpcError::Malformed(_))));
    }
}
