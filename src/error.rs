//! Error types for course-pool

use thiserror::Error;

use crate::models::Category;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Record not found: {0}")]
    NotFound(u64),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Insufficient pool for {category}: requested {requested}, only {available} unplayed")]
    InsufficientPool {
        category: Category,
        requested: usize,
        available: usize,
    },

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Corrupt record {id}: {reason}")]
    CorruptRecord { id: u64, reason: String },

    #[error("Asset fidelity check failed: {0}")]
    AssetFidelity(String),

    #[error("Remote catalog error: {0}")]
    Remote(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No avatar templates loaded")]
    NoTemplates,

    #[error("Fetch queue closed")]
    QueueClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PoolError {
    /// Corrupt entries are never re-served, so callers see them as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PoolError::NotFound(_) | PoolError::CorruptRecord { .. })
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;
