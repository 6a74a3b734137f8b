//! Frame codec for length-prefixed framing with optional LZ4 compression.
//!
//! # Frame Format
//!
//! Each frame consists of:
//! - 4 bytes: magic bytes "SMUX"
//! - 4 bytes: payload length (big-endian, includes flags byte)
//! - 1 byte: flags (bit 0 = compressed)
//! - N bytes: payload (possibly LZ4 compressed)
//!
//! Payloads larger than 1 KiB are compressed when the codec has
//! compression enabled; the flags byte records whether a given payload
//! is compressed, so both ends interoperate regardless of the setting.

use crate::error::{ProtocolError, Result};

/// Magic bytes identifying a ShellMux frame.
pub const FRAME_MAGIC: [u8; 4] = *b"SMUX";

/// Compression threshold in bytes. Payloads larger than this are compressed.
pub const COMPRESSION_THRESHOLD: usize = 1024;

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frame header size: 4 (magic) + 4 (length) + 1 (flags) = 9 bytes.
pub const FRAME_HEADER_SIZE: usize = 9;

/// Flags describing frame properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Flag indicating the payload is LZ4 compressed.
    pub const COMPRESSED: u8 = 0b0000_0001;

    /// Create an empty flags set.
    #[inline]
    pub fn new() -> Self {
        Self(0)
    }

    /// Create flags from a raw byte value.
    #[inline]
    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Raw byte value of the flags.
    #[inline]
    pub fn as_byte(self) -> u8 {
        self.0
    }

    /// Whether the compressed flag is set.
    #[inline]
    pub fn is_compressed(self) -> bool {
        self.0 & Self::COMPRESSED != 0
    }

    /// Return flags with the compressed bit set accordingly.
    #[inline]
    pub fn with_compressed(mut self, compressed: bool) -> Self {
        if compressed {
            self.0 |= Self::COMPRESSED;
        } else {
            self.0 &= !Self::COMPRESSED;
        }
        self
    }
}

/// Encoder and decoder for ShellMux frames.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    compression_enabled: bool,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Create a codec with compression enabled.
    pub fn new() -> Self {
        Self {
            compression_enabled: true,
        }
    }

    /// Create a codec that never compresses outgoing payloads.
    pub fn without_compression() -> Self {
        Self {
            compression_enabled: false,
        }
    }

    /// Encode a payload into a complete frame.
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() > MAX_FRAME_SIZE - FRAME_HEADER_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len() + FRAME_HEADER_SIZE,
                max: MAX_FRAME_SIZE,
            });
        }

        let compress = self.compression_enabled && payload.len() > COMPRESSION_THRESHOLD;
        let (flags, body) = if compress {
            let compressed = lz4_flex::compress_prepend_size(payload);
            // Incompressible data can grow; fall back to the raw payload.
            if compressed.len() < payload.len() {
                (FrameFlags::new().with_compressed(true), compressed)
            } else {
                (FrameFlags::new(), payload.to_vec())
            }
        } else {
            (FrameFlags::new(), payload.to_vec())
        };

        let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
        out.extend_from_slice(&FRAME_MAGIC);
        out.extend_from_slice(&((body.len() + 1) as u32).to_be_bytes());
        out.push(flags.as_byte());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode a frame header, returning the flags and the body length
    /// (the number of payload bytes following the header).
    pub fn decode_header(header: &[u8; FRAME_HEADER_SIZE]) -> Result<(FrameFlags, usize)> {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&header[0..4]);
        if magic != FRAME_MAGIC {
            return Err(ProtocolError::InvalidFrameMagic {
                expected: FRAME_MAGIC,
                got: magic,
            });
        }

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&header[4..8]);
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len == 0 {
            return Err(ProtocolError::IncompleteFrame {
                needed: 1,
                available: 0,
            });
        }
        if len + FRAME_HEADER_SIZE - 1 > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: len + FRAME_HEADER_SIZE - 1,
                max: MAX_FRAME_SIZE,
            });
        }

        let flags = FrameFlags::from_byte(header[8]);
        Ok((flags, len - 1))
    }

    /// Decode a frame body into the original payload, decompressing if
    /// the flags say so.
    pub fn decode_payload(flags: FrameFlags, body: &[u8]) -> Result<Vec<u8>> {
        if flags.is_compressed() {
            lz4_flex::decompress_size_prepended(body)
                .map_err(|e| ProtocolError::Decompression(e.to_string()))
        } else {
            Ok(body.to_vec())
        }
    }

    /// Decode one complete frame from a byte buffer.
    ///
    /// Returns the payload and the number of bytes consumed.
    pub fn decode(&self, bytes: &[u8]) -> Result<(Vec<u8>, usize)> {
        if bytes.len() < FRAME_HEADER_SIZE {
            return Err(ProtocolError::IncompleteFrame {
                needed: FRAME_HEADER_SIZE,
                available: bytes.len(),
            });
        }

        let mut header = [0u8; FRAME_HEADER_SIZE];
        header.copy_from_slice(&bytes[..FRAME_HEADER_SIZE]);
        let (flags, body_len) = Self::decode_header(&header)?;

        let total = FRAME_HEADER_SIZE + body_len;
        if bytes.len() < total {
            return Err(ProtocolError::IncompleteFrame {
                needed: total,
                available: bytes.len(),
            });
        }

        let payload = Self::decode_payload(flags, &bytes[FRAME_HEADER_SIZE..total])?;
        Ok((payload, total))
    }
}
