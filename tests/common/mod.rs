//! Shared fakes for integration tests
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use course_pool::codec::MetaHeader;
use course_pool::error::{PoolError, Result};
use course_pool::layout::{self, PoolLayout};
use course_pool::models::{Category, ContentRecord, Descriptor, RecordKind};
use course_pool::pipeline::assets::ASSET_NAMES;
use course_pool::pipeline::{AssetCompressor, RemoteCatalog, RemoteCourse};
use course_pool::synth::avatar::{AvatarMeta, BLOCK_LEN, BLOCK_OFFSET, META_MAGIC};
use zip::write::SimpleFileOptions;

pub fn remote_course(id: &str, theme: u32, maker: &str) -> RemoteCourse {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "courseTheme": theme,
        "title": format!("Course {}", id),
        "maker": maker,
        "uploaded": 1_500_000_000u64,
        "lastmodified": 1_500_000_500u64,
        "stars": 3,
        "gameStyle": 1,
        "size": 999999,
    }))
    .unwrap()
}

/// Raw asset bytes the fake catalog serves for a course
pub fn asset_bytes(remote_id: &str, asset: &str, lossy: bool) -> Vec<u8> {
    let prefix = if lossy { "LOSSY:" } else { "" };
    format!("{}{}:{}", prefix, remote_id, asset).into_bytes()
}

pub fn course_zip(remote_id: &str, lossy: bool) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for name in ASSET_NAMES {
        writer
            .start_file(format!("course000/{}", name), options)
            .unwrap();
        writer
            .write_all(&asset_bytes(remote_id, name, lossy))
            .unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// In-process remote catalog
#[derive(Default)]
pub struct FakeCatalog {
    courses: HashMap<Category, Vec<RemoteCourse>>,
    lossy: HashSet<String>,
    /// Listing calls that fail before the catalog starts answering
    failures: AtomicU32,
    pub list_calls: AtomicU32,
    pub downloads: Mutex<Vec<String>>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_courses(mut self, category: Category, courses: Vec<RemoteCourse>) -> Self {
        self.courses.insert(category, courses);
        self
    }

    pub fn with_lossy(mut self, remote_id: &str) -> Self {
        self.lossy.insert(remote_id.to_string());
        self
    }

    pub fn failing(self, times: u32) -> Self {
        self.failures.store(times, Ordering::SeqCst);
        self
    }

    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn downloaded(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteCatalog for FakeCatalog {
    async fn list(&self, category: Category, page: u32, page_size: u32) -> Result<Vec<RemoteCourse>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(PoolError::Remote("connection reset".to_string()));
        }

        let all = self.courses.get(&category).cloned().unwrap_or_default();
        let start = (page * page_size) as usize;
        Ok(all
            .into_iter()
            .skip(start)
            .take(page_size as usize)
            .collect())
    }

    async fn download_archive(&self, remote_id: &str) -> Result<Vec<u8>> {
        self.downloads.lock().unwrap().push(remote_id.to_string());
        Ok(course_zip(remote_id, self.lossy.contains(remote_id)))
    }
}

/// Prefixes every asset with `Z`; assets starting with `LOSSY:` fail the round trip
pub struct PrefixCompressor;

#[async_trait]
impl AssetCompressor for PrefixCompressor {
    async fn compress(&self, asset: &Path) -> Result<Vec<u8>> {
        let raw = tokio::fs::read(asset).await?;
        if raw.starts_with(b"LOSSY:") {
            return Err(PoolError::AssetFidelity(format!(
                "round trip of {} differs",
                asset.display()
            )));
        }
        let mut out = vec![b'Z'];
        out.extend_from_slice(&raw);
        Ok(out)
    }
}

pub fn compressed(remote_id: &str, asset: &str) -> Vec<u8> {
    let mut out = vec![b'Z'];
    out.extend_from_slice(&asset_bytes(remote_id, asset, false));
    out
}

/// Write a complete, valid pool entry as the pipeline would
pub fn write_entry(layout: &PoolLayout, category: Category, id: u64, maker: &str) -> Vec<u8> {
    let chunks: [&[u8]; 4] = [b"thumb0", b"course-data", b"course-sub", b"thumb1"];
    let header = MetaHeader::from_chunks(0, chunks);
    let path = layout.payload_path(category, id);
    let descriptor = Descriptor {
        index: id,
        remote_id: format!("r{}", id),
        title: format!("Course {}", id),
        maker: maker.to_string(),
        category,
        theme: 0,
        uploaded: 10,
        lastmodified: 20,
        stars: 1,
        size: header.payload_size(),
        meta_binary: header.encode().to_vec(),
        extra: serde_json::Map::new(),
    };
    std::fs::write(
        layout::sidecar_path(&path),
        serde_json::to_vec(&descriptor).unwrap(),
    )
    .unwrap();
    let payload = chunks.concat();
    std::fs::write(&path, &payload).unwrap();
    payload
}

/// Bare payload file, enough for the pipeline's unplayed count
pub fn write_placeholder(layout: &PoolLayout, category: Category, id: u64, played: bool) {
    let path = layout.payload_path(category, id);
    std::fs::write(&path, b"").unwrap();
    if played {
        std::fs::write(layout::played_marker(&path), b"").unwrap();
    }
}

/// Avatar meta payload: magic, zeroed opaque words and a named avatar block
pub fn avatar_meta(name: &str) -> Vec<u8> {
    let mut buf = vec![0u8; BLOCK_OFFSET + BLOCK_LEN + 5 * 4];
    buf[..4].copy_from_slice(META_MAGIC);
    AvatarMeta::parse(&mut buf).unwrap().rename(name);
    buf
}

pub fn avatar(id: u64, owner_id: u64, name: &str) -> ContentRecord {
    let meta = avatar_meta(name);
    ContentRecord {
        id,
        owner_id,
        kind: RecordKind::Avatar,
        display_name: name.to_string(),
        payload_size: meta.len() as u64,
        header: None,
        raw_payload: meta,
        created_at: 0,
        updated_at: 0,
        stars: 0,
        tags: vec![],
        ratings: vec![],
    }
}
