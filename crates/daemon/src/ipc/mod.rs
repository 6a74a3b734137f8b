//! Unix Domain Socket IPC module for CLI-daemon communication.
//!
//! This module provides a local control channel between the `shellmux`
//! CLI and the daemon using Unix Domain Sockets. It is separate from
//! the hub socket that carries session traffic; IPC only answers
//! administrative queries (status, session list) and lifecycle commands
//! (stop, close a session).
//!
//! The IPC system uses a JSON newline-delimited protocol for simplicity
//! and debugging convenience. Each message is a single JSON object
//! followed by a newline.
//!
//! ## Socket Path
//!
//! The socket path follows the XDG Base Directory Specification:
//! - Primary: `$XDG_RUNTIME_DIR/shellmux/control.sock`
//! - Fallback: `/tmp/shellmux-$UID/control.sock`

mod client;
mod messages;
mod wire;

pub use client::ControlClient;
pub use messages::{IpcRequest, IpcResponse, IpcSessionInfo};
pub use wire::{bind_control_socket, read_message, write_message, IpcError};

use std::path::PathBuf;

/// Directory holding the daemon's sockets.
///
/// `$XDG_RUNTIME_DIR` is preferred because it is typically a tmpfs with
/// 0700 permissions that is cleaned up on logout.
#[cfg(unix)]
pub fn runtime_dir() -> PathBuf {
    use std::os::unix::fs::MetadataExt;

    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("shellmux")
    } else {
        // Get UID by checking metadata of a file we own
        let uid = std::fs::metadata("/proc/self")
            .map(|m| m.uid())
            .unwrap_or(0);

        PathBuf::from(format!("/tmp/shellmux-{}", uid))
    }
}

/// Non-Unix platforms are not supported for Unix Domain Sockets.
#[cfg(not(unix))]
pub fn runtime_dir() -> PathBuf {
    // This will fail at runtime on non-Unix platforms
    PathBuf::from("/tmp/shellmux-unsupported")
}

/// Get the socket path for IPC communication.
pub fn get_socket_path() -> PathBuf {
    runtime_dir().join("control.sock")
}

/// Get the socket path the hub serves session traffic on.
pub fn get_hub_socket_path() -> PathBuf {
    runtime_dir().join("hub.sock")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_get_socket_path_with_xdg_runtime_dir() {
        let original = std::env::var("XDG_RUNTIME_DIR").ok();

        // SAFETY: serialized test, no concurrent env access
        unsafe {
            std::env::set_var("XDG_RUNTIME_DIR", "/run/user/1000");
        }
        let path = get_socket_path();
        assert_eq!(path, PathBuf::from("/run/user/1000/shellmux/control.sock"));

        // SAFETY: serialized test, no concurrent env access
        unsafe {
            if let Some(val) = original {
                std::env::set_var("XDG_RUNTIME_DIR", val);
            } else {
                std::env::remove_var("XDG_RUNTIME_DIR");
            }
        }
    }

    #[test]
    #[serial]
    fn test_get_socket_path_without_xdg_runtime_dir() {
        let original = std::env::var("XDG_RUNTIME_DIR").ok();

        // SAFETY: serialized test, no concurrent env access
        unsafe {
            std::env::remove_var("XDG_RUNTIME_DIR");
        }
        let path = get_socket_path();
        assert!(path.to_str().unwrap().starts_with("/tmp/shellmux-"));
        assert!(path.to_str().unwrap().ends_with("/control.sock"));

        // SAFETY: serialized test, no concurrent env access
        unsafe {
            if let Some(val) = original {
                std::env::set_var("XDG_RUNTIME_DIR", val);
            }
        }
    }

    #[test]
    #[serial]
    fn test_socket_path_is_absolute() {
        let path = get_socket_path();
        assert!(path.is_absolute());
    }
}
