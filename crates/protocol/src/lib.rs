//! # ShellMux Protocol Library
//!
//! Message definitions and the frame codec shared by the ShellMux
//! daemon and its clients.
//!
//! ## Overview
//!
//! - **Message Definitions**: session open/input/resize/close requests
//!   and the data/error/closed push notifications, MessagePack-encoded.
//! - **Frame Codec**: length-prefixed framing with optional LZ4
//!   compression for transport over a byte stream.
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Envelope, FrameCodec, Message};
//! use protocol::messages::SessionInput;
//!
//! // Build an input request for a session
//! let message = Message::SessionInput(SessionInput {
//!     session_id: "3f2c".to_string(),
//!     data: b"ls\n".to_vec(),
//! });
//! let envelope = Envelope::new(1, message);
//!
//! // Serialize and frame it for transport
//! let codec = FrameCodec::new();
//! let frame = codec.encode(&envelope.to_msgpack().unwrap()).unwrap();
//!
//! // ...and back
//! let (payload, _consumed) = codec.decode(&frame).unwrap();
//! let decoded = Envelope::from_msgpack(&payload).unwrap();
//! assert_eq!(decoded.sequence, 1);
//! ```

pub mod error;
pub mod framing;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use framing::{FrameCodec, FrameFlags, FRAME_HEADER_SIZE, FRAME_MAGIC, MAX_FRAME_SIZE};
pub use messages::{Envelope, Message, PROTOCOL_VERSION};
