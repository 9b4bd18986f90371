//! Pool data model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::codec::MetaHeader;
use crate::error::{PoolError, Result};

/// Difficulty bucket a course belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Category {
    Easy = 0,
    Normal = 1,
    Expert = 2,
    SuperExpert = 3,
}

impl Category {
    /// All categories in replenishment order
    pub const ALL: [Category; 4] = [
        Category::Easy,
        Category::Normal,
        Category::Expert,
        Category::SuperExpert,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Directory name of this bucket under the pool root
    pub fn dir_name(self) -> &'static str {
        match self {
            Category::Easy => "0",
            Category::Normal => "1",
            Category::Expert => "2",
            Category::SuperExpert => "3",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Easy => "easy",
            Category::Normal => "normal",
            Category::Expert => "expert",
            Category::SuperExpert => "super-expert",
        };
        f.write_str(name)
    }
}

impl TryFrom<u8> for Category {
    type Error = PoolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Category::Easy),
            1 => Ok(Category::Normal),
            2 => Ok(Category::Expert),
            3 => Ok(Category::SuperExpert),
            other => Err(PoolError::InvalidArgument(format!(
                "unknown category {}",
                other
            ))),
        }
    }
}

impl From<Category> for u8 {
    fn from(category: Category) -> u8 {
        category as u8
    }
}

impl FromStr for Category {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "easy" => Ok(Category::Easy),
            "1" | "normal" => Ok(Category::Normal),
            "2" | "expert" => Ok(Category::Expert),
            "3" | "super-expert" | "superexpert" => Ok(Category::SuperExpert),
            _ => Err(PoolError::InvalidArgument(format!("unknown category '{}'", s))),
        }
    }
}

/// What a content record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Course,
    Avatar,
}

/// Rating slot attached to a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    pub slot: u8,
    pub total_value: i64,
    pub count: u32,
}

/// One course or avatar as served to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: u64,
    pub owner_id: u64,
    pub kind: RecordKind,
    pub display_name: String,
    pub payload_size: u64,
    /// Course meta header; avatars carry none
    #[serde(default)]
    pub header: Option<MetaHeader>,
    /// Opaque meta payload as handed to the client
    #[serde(default)]
    pub raw_payload: Vec<u8>,
    pub created_at: u64,
    pub updated_at: u64,
    #[serde(default)]
    pub stars: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub ratings: Vec<Rating>,
}

impl ContentRecord {
    /// Build a course record from its on-disk descriptor.
    ///
    /// Fails with `CorruptRecord` when the embedded header disagrees with the
    /// declared size.
    pub fn from_descriptor(id: u64, owner_id: u64, descriptor: &Descriptor) -> Result<Self> {
        let header = MetaHeader::decode(&descriptor.meta_binary).map_err(|e| {
            PoolError::CorruptRecord {
                id,
                reason: e.to_string(),
            }
        })?;

        if header.payload_size() != descriptor.size {
            return Err(PoolError::CorruptRecord {
                id,
                reason: format!(
                    "descriptor size {} != header chunk total {}",
                    descriptor.size,
                    header.payload_size()
                ),
            });
        }

        Ok(Self {
            id,
            owner_id,
            kind: RecordKind::Course,
            display_name: descriptor.title.clone(),
            payload_size: descriptor.size,
            header: Some(header),
            raw_payload: header.encode().to_vec(),
            created_at: descriptor.uploaded,
            updated_at: descriptor.lastmodified,
            stars: descriptor.stars,
            tags: vec![String::new()],
            ratings: Vec::new(),
        })
    }
}

/// Best / first clear record of a course
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingRecord {
    pub course_id: u64,
    #[serde(default)]
    pub slot: u8,
    pub first_clear_owner: u64,
    pub best_owner: u64,
    pub best_score: i64,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Sidecar written next to every fetched course payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Local index (also the course id)
    pub index: u64,
    /// Identifier of the course in the remote catalog
    pub remote_id: String,
    pub title: String,
    pub maker: String,
    pub category: Category,
    pub theme: u32,
    #[serde(default)]
    pub uploaded: u64,
    #[serde(default)]
    pub lastmodified: u64,
    #[serde(default)]
    pub stars: u32,
    pub size: u64,
    /// Encoded meta header
    pub meta_binary: Vec<u8>,
    /// Remaining remote catalog fields, kept verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
