//! Content store - two-tier lookup of courses and avatars
//!
//! Tier one is the in-memory record map, hydrated from preload archives and
//! filled lazily by lookups. Tier two is the on-disk pool written by the
//! replenishment pipeline, reached through [`DiskIndex`] instead of a tree scan.
//! A disk hit is verified against its header, hydrated and cached in tier one.

pub mod index;

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use rand::seq::SliceRandom;
use serde::Serialize;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{PoolError, Result};
use crate::layout::{self, DiskEntry, PoolLayout};
use crate::models::{Category, ContentRecord, Descriptor, RankingRecord, RecordKind};
use crate::preload::BulkData;

pub use index::{BucketStats, DiskIndex, IndexEntry};

/// Turns a maker name from a descriptor into an owner id
#[async_trait]
pub trait OwnerResolver: Send + Sync {
    async fn resolve_owner(&self, name: &str) -> Result<u64>;
}

#[derive(Debug, Default)]
struct RecordMaps {
    courses: HashMap<u64, ContentRecord>,
    avatars: HashMap<u64, ContentRecord>,
    avatar_by_owner: HashMap<u64, u64>,
    /// Hydrated (non-synthetic) avatar ids, sorted
    templates: Vec<u64>,
    top_courses: Vec<ContentRecord>,
    rankings: HashMap<u64, RankingRecord>,
    buffer_queues: HashMap<u64, Vec<Bytes>>,
}

/// Pool statistics across all categories
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub buckets: Vec<(Category, BucketStats)>,
    pub cached_courses: usize,
    pub cached_avatars: usize,
}

pub struct ContentStore {
    layout: PoolLayout,
    public_base_url: String,
    default_avatar_owner: Option<u64>,
    records: RwLock<RecordMaps>,
    index: RwLock<DiskIndex>,
}

impl ContentStore {
    /// Open the store over `layout`, scanning the pool once to build the index.
    pub async fn open(
        layout: PoolLayout,
        public_base_url: impl Into<String>,
        default_avatar_owner: Option<u64>,
    ) -> Result<Self> {
        layout.ensure_dirs().await?;
        let entries = layout.list_all().await?;
        let index = DiskIndex::from_entries(entries);

        info!(
            path = %layout.root().display(),
            entries = index.len(),
            "Opened content store"
        );

        Ok(Self {
            layout,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            default_avatar_owner,
            records: RwLock::new(RecordMaps::default()),
            index: RwLock::new(index),
        })
    }

    pub fn layout(&self) -> &PoolLayout {
        &self.layout
    }

    pub fn default_avatar_owner(&self) -> Option<u64> {
        self.default_avatar_owner
    }

    /// Load preload archives into the in-memory tier
    pub async fn hydrate(&self, bulk: BulkData) {
        let mut records = self.records.write().await;
        for course in bulk.courses {
            records.courses.insert(course.id, course);
        }
        for avatar in bulk.avatars {
            records.avatar_by_owner.insert(avatar.owner_id, avatar.id);
            records.templates.push(avatar.id);
            records.avatars.insert(avatar.id, avatar);
        }
        records.templates.sort_unstable();
        records.templates.dedup();
        records.top_courses = bulk.top_courses;
        for ranking in bulk.rankings {
            records.rankings.insert(ranking.course_id, ranking);
        }
        records.buffer_queues.extend(bulk.buffer_queues);
    }

    /// Idempotent upsert into the in-memory tier
    pub async fn insert(&self, record: ContentRecord) {
        let mut records = self.records.write().await;
        match record.kind {
            RecordKind::Course => {
                records.courses.insert(record.id, record);
            }
            RecordKind::Avatar => {
                records.avatar_by_owner.insert(record.owner_id, record.id);
                records.avatars.insert(record.id, record);
            }
        }
    }

    /// Idempotent upsert into the disk index
    pub async fn register_entry(&self, entry: DiskEntry) {
        self.index.write().await.insert(entry);
    }

    /// Look up a course (or avatar) by id, falling back to the on-disk pool.
    pub async fn lookup_by_id(&self, id: u64, owners: &dyn OwnerResolver) -> Result<ContentRecord> {
        {
            let records = self.records.read().await;
            if let Some(record) = records.courses.get(&id).or_else(|| records.avatars.get(&id)) {
                return Ok(record.clone());
            }
        }

        let entry = self.locate(id).await?;
        let descriptor = match self.load_verified(id, &entry).await {
            Ok((descriptor, _)) => descriptor,
            Err(e) => return Err(self.reject(id, e).await),
        };

        let owner_id = owners.resolve_owner(&descriptor.maker).await?;
        let record = ContentRecord::from_descriptor(id, owner_id, &descriptor)?;

        let mut records = self.records.write().await;
        let cached = records.courses.entry(id).or_insert(record).clone();
        debug!(id, category = %entry.category, "Hydrated course from disk");
        Ok(cached)
    }

    /// Verified payload bytes of a disk-backed course
    pub async fn read_payload(&self, id: u64) -> Result<Vec<u8>> {
        let entry = self.locate(id).await?;
        match self.load_verified(id, &entry).await {
            Ok((_, payload)) => Ok(payload),
            Err(e) => Err(self.reject(id, e).await),
        }
    }

    /// Public URL of a disk-backed course payload
    pub async fn course_url(&self, id: u64) -> Result<String> {
        let entry = self.locate(id).await?;
        Ok(format!(
            "{}/{}/{}",
            self.public_base_url,
            entry.category.dir_name(),
            layout::payload_file_name(id)
        ))
    }

    pub async fn lookup_avatar(&self, id: u64) -> Result<ContentRecord> {
        self.records
            .read()
            .await
            .avatars
            .get(&id)
            .cloned()
            .ok_or(PoolError::NotFound(id))
    }

    pub async fn lookup_owner_avatar(&self, owner_id: u64) -> Result<ContentRecord> {
        let records = self.records.read().await;
        records
            .avatar_by_owner
            .get(&owner_id)
            .and_then(|id| records.avatars.get(id))
            .cloned()
            .ok_or(PoolError::NotFound(owner_id))
    }

    /// Owner avatar, or the configured default avatar when the owner is unknown
    pub async fn lookup_owner_avatar_or_default(&self, owner_id: u64) -> Result<ContentRecord> {
        match self.lookup_owner_avatar(owner_id).await {
            Err(PoolError::NotFound(_)) => match self.default_avatar_owner {
                Some(fallback) => self.lookup_owner_avatar(fallback).await,
                None => Err(PoolError::NotFound(owner_id)),
            },
            other => other,
        }
    }

    /// Hydrated avatars eligible as synthesis templates, ordered by id
    pub async fn avatar_templates(&self) -> Vec<ContentRecord> {
        let records = self.records.read().await;
        records
            .templates
            .iter()
            .filter_map(|id| records.avatars.get(id).cloned())
            .collect()
    }

    /// Draw `count` distinct unplayed courses of `category`, uniformly at random.
    ///
    /// Fails with `InsufficientPool` rather than returning a short list.
    pub async fn sample_unplayed(
        &self,
        category: Category,
        count: usize,
        owners: &dyn OwnerResolver,
    ) -> Result<Vec<ContentRecord>> {
        let mut candidates = self.index.read().await.unplayed(category);
        if candidates.len() < count {
            return Err(PoolError::InsufficientPool {
                category,
                requested: count,
                available: candidates.len(),
            });
        }

        candidates.shuffle(&mut rand::thread_rng());

        let mut available = candidates.len();
        let mut sample = Vec::with_capacity(count);
        for id in candidates {
            if sample.len() == count {
                break;
            }
            match self.lookup_by_id(id, owners).await {
                Ok(record) => sample.push(record),
                Err(e) if e.is_not_found() => {
                    available -= 1;
                    if available < count {
                        return Err(PoolError::InsufficientPool {
                            category,
                            requested: count,
                            available,
                        });
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Ok(sample)
    }

    pub async fn set_played(&self, id: u64) -> bool {
        self.index.write().await.set_played(id)
    }

    pub async fn is_played(&self, id: u64) -> bool {
        self.index.read().await.is_played(id)
    }

    /// Unplayed entries among `entries` that can still be served
    pub async fn count_servable_unplayed(&self, entries: &[DiskEntry]) -> usize {
        let index = self.index.read().await;
        entries
            .iter()
            .filter(|e| !e.played && !index.is_quarantined(e.id))
            .count()
    }

    /// Index entry for a disk-backed course.
    ///
    /// Falls back to probing the four category directories so payloads that
    /// appeared behind the index's back are still found.
    pub async fn locate(&self, id: u64) -> Result<IndexEntry> {
        {
            let index = self.index.read().await;
            if let Some(entry) = index.get(id) {
                return Ok(entry.clone());
            }
            if index.is_quarantined(id) {
                return Err(PoolError::NotFound(id));
            }
        }

        for category in Category::ALL {
            let path = self.layout.payload_path(category, id);
            if fs::try_exists(&path).await? {
                let played = fs::try_exists(layout::played_marker(&path)).await?;
                let entry = DiskEntry {
                    id,
                    category,
                    path,
                    played,
                };
                let mut index = self.index.write().await;
                index.insert(entry);
                if let Some(found) = index.get(id) {
                    return Ok(found.clone());
                }
            }
        }

        Err(PoolError::NotFound(id))
    }

    pub async fn lookup_ranking(&self, id: u64) -> Result<RankingRecord> {
        self.records
            .read()
            .await
            .rankings
            .get(&id)
            .cloned()
            .ok_or(PoolError::NotFound(id))
    }

    pub async fn top_courses(&self) -> Vec<ContentRecord> {
        self.records.read().await.top_courses.clone()
    }

    pub async fn buffer_queue(&self, id: u64) -> Result<Vec<Bytes>> {
        self.records
            .read()
            .await
            .buffer_queues
            .get(&id)
            .cloned()
            .ok_or(PoolError::NotFound(id))
    }

    pub async fn stats(&self) -> PoolStats {
        let buckets = {
            let index = self.index.read().await;
            Category::ALL
                .iter()
                .map(|&c| (c, index.stats(c)))
                .collect()
        };
        let records = self.records.read().await;
        PoolStats {
            buckets,
            cached_courses: records.courses.len(),
            cached_avatars: records.avatars.len(),
        }
    }

    /// Read descriptor and payload, checking both against the embedded header
    async fn load_verified(&self, id: u64, entry: &IndexEntry) -> Result<(Descriptor, Vec<u8>)> {
        let sidecar = fs::read(layout::sidecar_path(&entry.path)).await?;
        let descriptor: Descriptor =
            serde_json::from_slice(&sidecar).map_err(|e| PoolError::CorruptRecord {
                id,
                reason: format!("descriptor: {}", e),
            })?;

        let header = crate::codec::MetaHeader::decode(&descriptor.meta_binary).map_err(|e| {
            PoolError::CorruptRecord {
                id,
                reason: e.to_string(),
            }
        })?;

        let payload = fs::read(&entry.path).await?;
        header
            .verify_payload(&payload)
            .map_err(|reason| PoolError::CorruptRecord { id, reason })?;

        if descriptor.size != header.payload_size() {
            return Err(PoolError::CorruptRecord {
                id,
                reason: format!(
                    "descriptor size {} != header chunk total {}",
                    descriptor.size,
                    header.payload_size()
                ),
            });
        }

        Ok((descriptor, payload))
    }

    /// Quarantine corrupt entries and pass the error through
    async fn reject(&self, id: u64, err: PoolError) -> PoolError {
        let corrupt = match &err {
            PoolError::CorruptRecord { .. } => true,
            PoolError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        };
        if corrupt {
            warn!(id, error = %err, "Quarantining unreadable course");
            self.index.write().await.quarantine(id);
            if let PoolError::Io(_) = err {
                return PoolError::CorruptRecord {
                    id,
                    reason: err.to_string(),
                };
            }
        }
        err
    }
}
