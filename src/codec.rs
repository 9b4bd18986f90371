//! Course meta header codec
//!
//! Every course payload is described by a fixed 44-byte big-endian header that
//! the game client reads before fetching the payload itself:
//!
//! ```text
//! u32 format_tag
//! u32 theme
//! u32 size[chunk2] u32 size[chunk3] u32 size[chunk1] u32 size[chunk4]
//! u32 secondary_tag
//! u32 crc[chunk2]  u32 crc[chunk3]  u32 crc[chunk1]  u32 crc[chunk4]
//! ```
//!
//! The payload itself is the four chunks concatenated as chunk1..chunk4
//! (thumbnail0, course data, sub-course data, thumbnail1). The size/crc fields
//! use a different order; that asymmetry belongs to the client format.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::error::{PoolError, Result};

/// Encoded header length in bytes
pub const HEADER_LEN: usize = 44;

/// Number of payload chunks
pub const CHUNK_COUNT: usize = 4;

/// Tag value observed in every header written by the official servers
pub const DEFAULT_FORMAT_TAG: u32 = 1;

/// Wire position of each logical chunk in the size and checksum runs.
/// `WIRE_ORDER[n]` is the logical chunk index stored in slot `n`.
const WIRE_ORDER: [usize; CHUNK_COUNT] = [1, 2, 0, 3];

/// Decoded course meta header.
///
/// `sizes` and `checksums` are indexed by logical chunk (chunk1 at index 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaHeader {
    pub format_tag: u32,
    pub theme: u32,
    pub sizes: [u32; CHUNK_COUNT],
    pub secondary_tag: u32,
    pub checksums: [u32; CHUNK_COUNT],
}

impl MetaHeader {
    /// Build a header describing the given chunks (logical order).
    pub fn from_chunks(theme: u32, chunks: [&[u8]; CHUNK_COUNT]) -> Self {
        let mut sizes = [0u32; CHUNK_COUNT];
        let mut checksums = [0u32; CHUNK_COUNT];
        for (i, chunk) in chunks.iter().enumerate() {
            sizes[i] = chunk.len() as u32;
            checksums[i] = checksum(chunk);
        }
        Self {
            format_tag: DEFAULT_FORMAT_TAG,
            theme,
            sizes,
            secondary_tag: DEFAULT_FORMAT_TAG,
            checksums,
        }
    }

    /// Total payload size: the sum of the four chunk sizes.
    pub fn payload_size(&self) -> u64 {
        self.sizes.iter().map(|&s| s as u64).sum()
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        let mut buf = &mut out[..];
        buf.put_u32(self.format_tag);
        buf.put_u32(self.theme);
        for &chunk in &WIRE_ORDER {
            buf.put_u32(self.sizes[chunk]);
        }
        buf.put_u32(self.secondary_tag);
        for &chunk in &WIRE_ORDER {
            buf.put_u32(self.checksums[chunk]);
        }
        out
    }

    /// Decode a header from the first 44 bytes of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(PoolError::MalformedRecord(format!(
                "meta header needs {} bytes, got {}",
                HEADER_LEN,
                bytes.len()
            )));
        }

        let mut buf = &bytes[..HEADER_LEN];
        let format_tag = buf.get_u32();
        let theme = buf.get_u32();
        let mut sizes = [0u32; CHUNK_COUNT];
        for &chunk in &WIRE_ORDER {
            sizes[chunk] = buf.get_u32();
        }
        let secondary_tag = buf.get_u32();
        let mut checksums = [0u32; CHUNK_COUNT];
        for &chunk in &WIRE_ORDER {
            checksums[chunk] = buf.get_u32();
        }

        Ok(Self {
            format_tag,
            theme,
            sizes,
            secondary_tag,
            checksums,
        })
    }

    /// Check a payload against this header.
    ///
    /// Returns a human-readable reason on the first mismatch.
    pub fn verify_payload(&self, payload: &[u8]) -> std::result::Result<(), String> {
        if payload.len() as u64 != self.payload_size() {
            return Err(format!(
                "payload is {} bytes, header declares {}",
                payload.len(),
                self.payload_size()
            ));
        }

        let mut offset = 0usize;
        for chunk in 0..CHUNK_COUNT {
            let end = offset + self.sizes[chunk] as usize;
            let actual = checksum(&payload[offset..end]);
            if actual != self.checksums[chunk] {
                return Err(format!(
                    "chunk{} crc {:08x} != declared {:08x}",
                    chunk + 1,
                    actual,
                    self.checksums[chunk]
                ));
            }
            offset = end;
        }
        Ok(())
    }
}

/// CRC-32 (IEEE) of a chunk
pub fn checksum(chunk: &[u8]) -> u32 {
    crc32fast::hash(chunk)
}
