//! Record framing.
//!
//! Each record is stored as a frame with the following on-disk format:
//!
//! ```text
//! +---------------------+----------------------------------+
//! | length (big-endian) | payload                          |
//! | 8 bytes             | length bytes                     |
//! +---------------------+----------------------------------+
//! ```
//!
//! There is no magic, checksum, or version byte. A file is a plain
//! concatenation of frames.

use bytes::{BufMut, BytesMut};

/// Width of the length prefix in bytes.
pub const LEN_WIDTH: usize = 8;

/// A decoded frame and the offset it starts at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub offset: u64,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Returns the total size of this frame on disk.
    pub fn disk_size(&self) -> u64 {
        frame_size(self.payload.len())
    }

    /// Returns the offset of the frame that follows this one.
    pub fn next_offset(&self) -> u64 {
        self.offset + self.disk_size()
    }
}

/// Returns the on-disk size of a frame carrying `payload_len` bytes.
pub fn frame_size(payload_len: usize) -> u64 {
    (LEN_WIDTH + payload_len) as u64
}

/// Appends the frame for `payload` to `buf`.
pub fn encode_into(buf: &mut BytesMut, payload: &[u8]) {
    buf.reserve(LEN_WIDTH + payload.len());
    buf.put_u64(payload.len() as u64);
    buf.put_slice(payload);
}

/// Decodes a length prefix.
pub fn decode_len(header: [u8; LEN_WIDTH]) -> u64 {
    u64::from_be_bytes(header)
}
