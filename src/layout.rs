//! On-disk pool layout
//!
//! ```text
//! <data_dir>/
//! ├── 0/                          # one directory per category
//! │   ├── 10000000000-00001       # course payload (chunk1..chunk4)
//! │   ├── 10000000000-00001.json  # descriptor sidecar
//! │   ├── 10000000000-00001.played
//! │   └── <remote id>.remote      # dedup marker, holds the local index
//! ├── 1/ 2/ 3/
//! └── tmp/                        # scratch space for archive extraction
//! ```

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::Result;
use crate::models::Category;

/// Suffix every payload filename carries after the zero-padded id
pub const PAYLOAD_SUFFIX: &str = "-00001";

const SIDECAR_EXT: &str = ".json";
const PLAYED_EXT: &str = ".played";
const DEDUP_EXT: &str = ".remote";
const SCRATCH_DIR: &str = "tmp";

/// Lowest local course id; allocation starts here on an empty pool
pub const FIRST_LOCAL_ID: u64 = 10_000_000_000;

/// One payload file found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskEntry {
    pub id: u64,
    pub category: Category,
    pub path: PathBuf,
    pub played: bool,
}

/// Path arithmetic for the pool directory tree
#[derive(Debug, Clone)]
pub struct PoolLayout {
    root: PathBuf,
}

impl PoolLayout {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn category_dir(&self, category: Category) -> PathBuf {
        self.root.join(category.dir_name())
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join(SCRATCH_DIR)
    }

    pub fn payload_path(&self, category: Category, id: u64) -> PathBuf {
        self.category_dir(category).join(payload_file_name(id))
    }

    pub fn dedup_marker(&self, category: Category, remote_id: &str) -> PathBuf {
        self.category_dir(category)
            .join(format!("{}{}", remote_id, DEDUP_EXT))
    }

    /// Create the category and scratch directories if missing
    pub async fn ensure_dirs(&self) -> Result<()> {
        for category in Category::ALL {
            fs::create_dir_all(self.category_dir(category)).await?;
        }
        fs::create_dir_all(self.scratch_dir()).await?;
        Ok(())
    }

    /// List payload entries of one category.
    ///
    /// A missing category directory is an empty bucket.
    pub async fn list_entries(&self, category: Category) -> Result<Vec<DiskEntry>> {
        let dir = self.category_dir(category);
        let mut entries = Vec::new();

        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(parse_payload_name) else {
                continue;
            };
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            let played = fs::try_exists(played_marker(&path)).await?;
            entries.push(DiskEntry {
                id,
                category,
                path,
                played,
            });
        }

        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    /// List payload entries across all categories
    pub async fn list_all(&self) -> Result<Vec<DiskEntry>> {
        let mut all = Vec::new();
        for category in Category::ALL {
            all.extend(self.list_entries(category).await?);
        }
        Ok(all)
    }
}

pub fn payload_file_name(id: u64) -> String {
    format!("{:011}{}", id, PAYLOAD_SUFFIX)
}

/// Parse `<11 digits>-00001` back into an id
pub fn parse_payload_name(name: &str) -> Option<u64> {
    let digits = name.strip_suffix(PAYLOAD_SUFFIX)?;
    if digits.len() < 11 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

pub fn sidecar_path(payload: &Path) -> PathBuf {
    with_suffix(payload, SIDECAR_EXT)
}

pub fn played_marker(payload: &Path) -> PathBuf {
    with_suffix(payload, PLAYED_EXT)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

/// Remote ids become file names, so only a conservative charset is accepted
pub fn is_safe_remote_id(remote_id: &str) -> bool {
    !remote_id.is_empty()
        && remote_id.len() <= 128
        && remote_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
