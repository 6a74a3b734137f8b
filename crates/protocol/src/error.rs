//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering serialization and framing failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize a message.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize a message.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// Frame exceeds maximum allowed size.
    #[error("frame too large: {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Frame has invalid magic bytes.
    #[error("invalid frame magic: expected {expected:?}, got {got:?}")]
    InvalidFrameMagic {
        /// Expected magic value.
        expected: [u8; 4],
        /// Actual magic value received.
        got: [u8; 4],
    },

    /// Not enough bytes to decode a complete frame.
    #[error("incomplete frame: need {needed} bytes, have {available}")]
    IncompleteFrame {
        /// Bytes required for the full frame.
        needed: usize,
        /// Bytes currently available.
        available: usize,
    },

    /// Decompression of a frame payload failed.
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// Peer uses an incompatible protocol version.
    #[error("unsupported protocol version: {got} (supported: {supported})")]
    UnsupportedVersion {
        /// Version advertised by the peer.
        got: u8,
        /// Version supported by this build.
        supported: u8,
    },

    /// Connection was closed unexpectedly.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
