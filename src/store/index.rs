//! Id → path index over the on-disk pool
//!
//! Built with one directory scan at startup, then kept current by the
//! pipeline (new payloads) and the tracker (played markers), so a cache miss
//! never has to walk the tree.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use serde::Serialize;

use crate::layout::DiskEntry;
use crate::models::Category;

#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub category: Category,
    pub path: PathBuf,
    pub played: bool,
}

/// Per-category counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BucketStats {
    pub total: usize,
    pub played: usize,
    pub unplayed: usize,
    pub corrupt: usize,
}

#[derive(Debug, Default)]
pub struct DiskIndex {
    entries: HashMap<u64, IndexEntry>,
    /// Entries that failed verification; never served again
    quarantined: HashSet<u64>,
}

impl DiskIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = DiskEntry>) -> Self {
        let mut index = Self::new();
        for entry in entries {
            index.insert(entry);
        }
        index
    }

    /// Upsert an entry. A played flag, once set, survives re-registration.
    pub fn insert(&mut self, entry: DiskEntry) {
        let played = entry.played
            || self
                .entries
                .get(&entry.id)
                .map(|e| e.played)
                .unwrap_or(false);
        self.entries.insert(
            entry.id,
            IndexEntry {
                category: entry.category,
                path: entry.path,
                played,
            },
        );
    }

    pub fn get(&self, id: u64) -> Option<&IndexEntry> {
        if self.quarantined.contains(&id) {
            return None;
        }
        self.entries.get(&id)
    }

    pub fn is_quarantined(&self, id: u64) -> bool {
        self.quarantined.contains(&id)
    }

    pub fn quarantine(&mut self, id: u64) {
        self.quarantined.insert(id);
    }

    /// Returns true if the flag changed
    pub fn set_played(&mut self, id: u64) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) if !entry.played => {
                entry.played = true;
                true
            }
            _ => false,
        }
    }

    pub fn is_played(&self, id: u64) -> bool {
        self.entries.get(&id).map(|e| e.played).unwrap_or(false)
    }

    /// Servable, unplayed ids of a category in ascending order
    pub fn unplayed(&self, category: Category) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .entries
            .iter()
            .filter(|(id, e)| {
                e.category == category && !e.played && !self.quarantined.contains(id)
            })
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn stats(&self, category: Category) -> BucketStats {
        let mut stats = BucketStats::default();
        for (id, entry) in &self.entries {
            if entry.category != category {
                continue;
            }
            stats.total += 1;
            if self.quarantined.contains(id) {
                stats.corrupt += 1;
            } else if entry.played {
                stats.played += 1;
            } else {
                stats.unplayed += 1;
            }
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
