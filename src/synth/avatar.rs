//! Typed access to the avatar meta payload
//!
//! Avatar records carry a fixed-layout meta payload:
//!
//! ```text
//! 0x00  magic "BPFC"
//! 0x04  5 x u32 (opaque)
//! 0x18  avatar block, 96 bytes
//! 0x78  5 x u32 (opaque)
//! ```
//!
//! The avatar block stores the display name as 10 UTF-16LE code units at
//! 0x1A and a CRC-16 (XMODEM, big-endian) over its first 0x5E bytes at 0x5E.

use crate::error::{PoolError, Result};

pub const META_MAGIC: &[u8; 4] = b"BPFC";
pub const BLOCK_OFFSET: usize = 6 * 4;
pub const BLOCK_LEN: usize = 96;

const NAME_OFFSET: usize = 0x1A;
const NAME_UNITS: usize = 10;
const CRC_OFFSET: usize = 0x5E;

/// Characters the block's name field treats as format directives
const STRIPPED_CHARS: [char; 2] = ['%', '\\'];

/// The 96-byte avatar block embedded in an avatar meta payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarBlock {
    bytes: [u8; BLOCK_LEN],
}

impl AvatarBlock {
    pub fn from_bytes(bytes: [u8; BLOCK_LEN]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; BLOCK_LEN] {
        &self.bytes
    }

    pub fn name(&self) -> String {
        let units: Vec<u16> = self.bytes[NAME_OFFSET..NAME_OFFSET + NAME_UNITS * 2]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .take_while(|&u| u != 0)
            .collect();
        String::from_utf16_lossy(&units)
    }

    pub fn checksum_valid(&self) -> bool {
        let stored = u16::from_be_bytes([self.bytes[CRC_OFFSET], self.bytes[CRC_OFFSET + 1]]);
        crc16_xmodem(&self.bytes[..CRC_OFFSET]) == stored
    }

    /// Copy of this block carrying `name`, with the checksum recomputed.
    ///
    /// `%` and `\` are dropped and the name is cut to 10 UTF-16 units.
    pub fn renamed(&self, name: &str) -> Self {
        let mut bytes = self.bytes;
        let units: Vec<u16> = name
            .chars()
            .filter(|c| !STRIPPED_CHARS.contains(c))
            .collect::<String>()
            .encode_utf16()
            .take(NAME_UNITS)
            .collect();

        let field = &mut bytes[NAME_OFFSET..NAME_OFFSET + NAME_UNITS * 2];
        field.fill(0);
        for (i, unit) in units.iter().enumerate() {
            field[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        }

        let crc = crc16_xmodem(&bytes[..CRC_OFFSET]);
        bytes[CRC_OFFSET..CRC_OFFSET + 2].copy_from_slice(&crc.to_be_bytes());
        Self { bytes }
    }
}

/// Bounds-checked view over an avatar meta payload
pub struct AvatarMeta<'a> {
    buf: &'a mut [u8],
}

impl<'a> AvatarMeta<'a> {
    pub fn parse(buf: &'a mut [u8]) -> Result<Self> {
        if buf.len() < BLOCK_OFFSET + BLOCK_LEN {
            return Err(PoolError::MalformedRecord(format!(
                "avatar meta needs {} bytes, got {}",
                BLOCK_OFFSET + BLOCK_LEN,
                buf.len()
            )));
        }
        if &buf[..4] != META_MAGIC {
            return Err(PoolError::MalformedRecord(format!(
                "avatar meta magic {:02x?} != {:02x?}",
                &buf[..4],
                META_MAGIC
            )));
        }
        Ok(Self { buf })
    }

    pub fn block(&self) -> AvatarBlock {
        let mut bytes = [0u8; BLOCK_LEN];
        bytes.copy_from_slice(&self.buf[BLOCK_OFFSET..BLOCK_OFFSET + BLOCK_LEN]);
        AvatarBlock::from_bytes(bytes)
    }

    pub fn set_block(&mut self, block: &AvatarBlock) {
        self.buf[BLOCK_OFFSET..BLOCK_OFFSET + BLOCK_LEN].copy_from_slice(block.as_bytes());
    }

    /// Rewrite the embedded avatar block with a renamed copy
    pub fn rename(&mut self, name: &str) {
        let renamed = self.block().renamed(name);
        self.set_block(&renamed);
    }
}

/// CRC-16/XMODEM (poly 0x1021, init 0)
fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Minimal valid avatar meta payload
#[cfg(test)]
pub(crate) fn sample_meta(name: &str) -> Vec<u8> {
    let mut buf = vec![0u8; BLOCK_OFFSET + BLOCK_LEN + 5 * 4];
    buf[..4].copy_from_slice(META_MAGIC);
    for (i, b) in buf[BLOCK_OFFSET..BLOCK_OFFSET + NAME_OFFSET].iter_mut().enumerate() {
        *b = i as u8;
    }
    let mut meta = AvatarMeta { buf: &mut buf };
    meta.rename(name);
    buf
}
