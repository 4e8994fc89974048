//! gRPC Message Framing (5-byte header)
//!
//! gRPC では各メッセージに 5 バイトのヘッダーが付与されます:
//!
//! ```text
//! +------------------+
//! | 1 byte: flags    |  bit 0 = compressed (0/1)
//! +------------------+
//! | 4 bytes: length  |  big-endian message length
//! +------------------+
//! | N bytes: message |  Protobuf or JSON bytes
//! +------------------+
//! ```
//!
//! デコードはストリーミング対応です。エンベロープが複数の I/O チャンクに
//! 分割されて到着しても、完全なエンベロープが揃うまでバッファに保持し、
//! 揃った時点で初めて消費します。

use bytes::{Buf, Bytes, BytesMut};

use crate::error::GrpcError;

/// gRPC framing header size (1 byte flags + 4 bytes length)
pub const GRPC_FRAME_HEADER_SIZE: usize = 5;

/// Maximum gRPC message size (default: 4MB)
pub const GRPC_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// gRPC message frame
#[derive(Debug, Clone)]
pub struct GrpcFrame {
    /// Compression flag (bit 0 of flags byte)
    pub compressed: bool,
    /// Message payload (Protobuf or JSON bytes)
    pub data: Bytes,
}

impl GrpcFrame {
    /// Create a new uncompressed frame
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            compressed: false,
            data: data.into(),
        }
    }

    /// Create a new compressed frame
    pub fn compressed(data: impl Into<Bytes>) -> Self {
        Self {
            compressed: true,
            data: data.into(),
        }
    }

    /// Encode frame to bytes
    ///
    /// Returns 5-byte header + payload
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(GRPC_FRAME_HEADER_SIZE + self.data.len());
        buf.push(if self.compressed { 1 } else { 0 });
        buf.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Encode frame header only (for streaming writes)
    pub fn encode_header(&self) -> [u8; GRPC_FRAME_HEADER_SIZE] {
        let mut header = [0u8; GRPC_FRAME_HEADER_SIZE];
        header[0] = if self.compressed { 1 } else { 0 };
        header[1..5].copy_from_slice(&(self.data.len() as u32).to_be_bytes());
        header
    }

    /// Get total frame size (header + payload)
    pub fn total_size(&self) -> usize {
        GRPC_FRAME_HEADER_SIZE + self.data.len()
    }
}

/// Streaming gRPC frame decoder
///
/// Keyed per stream: each stream owns one decoder instance that buffers
/// partial envelopes between `feed` calls.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_message_size: usize,
}

impl FrameDecoder {
    /// Create new decoder with default max size
    pub fn new() -> Self {
        Self::with_max_size(GRPC_MAX_MESSAGE_SIZE)
    }

    /// Create decoder with custom max size
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            max_message_size: max_size,
        }
    }

    /// Add data to the internal buffer
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next complete frame
    ///
    /// Returns `None` if no complete envelope is buffered yet. The length
    /// prefix is validated against the max message size before the payload
    /// arrives, so an oversized claim fails fast.
    pub fn decode_next(&mut self) -> Result<Option<GrpcFrame>, GrpcError> {
        if self.buffer.len() < GRPC_FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let flags = self.buffer[0];
        if flags > 1 {
            return Err(GrpcError::InvalidFrame(format!(
                "reserved flag bits set: 0x{:02x}",
                flags
            )));
        }

        let length = u32::from_be_bytes([
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
            self.buffer[4],
        ]) as usize;

        if length > self.max_message_size {
            return Err(GrpcError::MessageTooLarge {
                size: length,
                max: self.max_message_size,
            });
        }

        if self.buffer.len() < GRPC_FRAME_HEADER_SIZE + length {
            return Ok(None);
        }

        self.buffer.advance(GRPC_FRAME_HEADER_SIZE);
        let data = self.buffer.split_to(length).freeze();

        Ok(Some(GrpcFrame {
            compressed: flags == 1,
            data,
        }))
    }

    /// Check if the buffer has any pending data
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Get pending buffer length
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
