//! Bulk preload archives
//!
//! At startup the in-memory tier is hydrated from fixed archives: the "top"
//! course list, a base course set, the avatar set, course rankings and the
//! per-record buffer queues. Record archives are decoded through the
//! [`SequenceDecoder`] seam so the protocol runtime's own record format can be
//! plugged in; [`ArchiveDecoder`] reads the JSON exports and the little-endian
//! count-prefixed buffer format.

use std::collections::HashMap;
use std::path::Path;

use bytes::{Buf, Bytes};
use tracing::info;

use crate::config::PreloadConfig;
use crate::error::{PoolError, Result};
use crate::models::{ContentRecord, RankingRecord};

/// Decoding primitives for preload archives
pub trait SequenceDecoder: Send + Sync {
    /// Decode a sequence of records
    fn decode_sequence(&self, buf: &[u8]) -> Result<Vec<ContentRecord>>;

    /// Decode a sequence of ranking records
    fn decode_rankings(&self, buf: &[u8]) -> Result<Vec<RankingRecord>>;

    /// Decode one count-prefixed sequence of byte buffers, advancing `buf`
    fn decode_count_prefixed_sequence(&self, buf: &mut &[u8]) -> Result<Vec<Bytes>>;
}

/// Default decoder for exported archives
#[derive(Debug, Default, Clone, Copy)]
pub struct ArchiveDecoder;

impl SequenceDecoder for ArchiveDecoder {
    fn decode_sequence(&self, buf: &[u8]) -> Result<Vec<ContentRecord>> {
        Ok(serde_json::from_slice(buf)?)
    }

    fn decode_rankings(&self, buf: &[u8]) -> Result<Vec<RankingRecord>> {
        Ok(serde_json::from_slice(buf)?)
    }

    fn decode_count_prefixed_sequence(&self, buf: &mut &[u8]) -> Result<Vec<Bytes>> {
        let count = take_u32(buf, "sequence count")? as usize;
        let mut out = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            need(buf, 2, "buffer length")?;
            let len = buf.get_u16_le() as usize;
            need(buf, len, "buffer body")?;
            out.push(buf.copy_to_bytes(len));
        }
        Ok(out)
    }
}

fn need(buf: &[u8], n: usize, what: &str) -> Result<()> {
    if buf.remaining() < n {
        return Err(PoolError::MalformedRecord(format!(
            "truncated {}: need {} bytes, {} left",
            what,
            n,
            buf.remaining()
        )));
    }
    Ok(())
}

fn take_u32(buf: &mut &[u8], what: &str) -> Result<u32> {
    need(buf, 4, what)?;
    Ok(buf.get_u32_le())
}

/// Decode the buffer-queue archive: `u32 count`, then per entry
/// `u64 record id` followed by a count-prefixed buffer sequence.
pub fn decode_buffer_queues(
    decoder: &dyn SequenceDecoder,
    mut buf: &[u8],
) -> Result<HashMap<u64, Vec<Bytes>>> {
    let count = take_u32(&mut buf, "queue count")?;
    let mut queues = HashMap::with_capacity(count.min(4096) as usize);
    for _ in 0..count {
        need(buf, 8, "record id")?;
        let id = buf.get_u64_le();
        let buffers = decoder.decode_count_prefixed_sequence(&mut buf)?;
        queues.insert(id, buffers);
    }
    Ok(queues)
}

/// Everything hydrated into the in-memory tier at startup
#[derive(Debug, Default, Clone)]
pub struct BulkData {
    pub top_courses: Vec<ContentRecord>,
    pub courses: Vec<ContentRecord>,
    pub avatars: Vec<ContentRecord>,
    pub rankings: Vec<RankingRecord>,
    pub buffer_queues: HashMap<u64, Vec<Bytes>>,
}

impl BulkData {
    /// Load every configured archive. Unset paths are skipped.
    pub async fn load(
        config: &PreloadConfig,
        decoder: &dyn SequenceDecoder,
        excluded_course_ids: &[u64],
    ) -> Result<Self> {
        let mut bulk = BulkData::default();

        if let Some(buf) = read_optional(config.top_courses.as_deref()).await? {
            bulk.top_courses = decoder.decode_sequence(&buf)?;
        }
        if let Some(buf) = read_optional(config.courses.as_deref()).await? {
            bulk.courses = decoder
                .decode_sequence(&buf)?
                .into_iter()
                .filter(|r| !excluded_course_ids.contains(&r.id))
                .collect();
        }
        if let Some(buf) = read_optional(config.avatars.as_deref()).await? {
            bulk.avatars = decoder.decode_sequence(&buf)?;
        }
        if let Some(buf) = read_optional(config.rankings.as_deref()).await? {
            bulk.rankings = decoder.decode_rankings(&buf)?;
        }
        if let Some(buf) = read_optional(config.buffer_queues.as_deref()).await? {
            bulk.buffer_queues = decode_buffer_queues(decoder, &buf)?;
        }

        info!(
            top = bulk.top_courses.len(),
            courses = bulk.courses.len(),
            avatars = bulk.avatars.len(),
            rankings = bulk.rankings.len(),
            buffer_queues = bulk.buffer_queues.len(),
            "Loaded preload archives"
        );

        Ok(bulk)
    }
}

async fn read_optional(path: Option<&Path>) -> Result<Option<Vec<u8>>> {
    match path {
        Some(p) => Ok(Some(tokio::fs::read(p).await?)),
        None => Ok(None),
    }
}
