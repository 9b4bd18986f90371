//! course-pool - Self-replenishing course and avatar content pool
//!
//! Serves user-made courses and avatar records to a game protocol layer and
//! keeps a per-difficulty pool of unplayed courses topped up from a remote
//! catalog.
//!
//! ## Architecture
//!
//! - **codec**: 44-byte course meta header and chunk checksums
//! - **store**: two-tier lookup (memory, then the on-disk pool via an id index)
//! - **pipeline**: single background worker that fetches, compresses,
//!   verifies and writes new courses
//! - **tracker**: played markers; the first mark of a course queues a refill
//! - **synth**: placeholder owner identities cloned from avatar templates
//!
//! ## Storage Layout
//!
//! ```text
//! www/smmdb/
//! ├── 0/ 1/ 2/ 3/                 # One directory per difficulty
//! │   ├── 10000000000-00001       # Course payload (chunk1..chunk4)
//! │   ├── 10000000000-00001.json  # Descriptor sidecar
//! │   ├── 10000000000-00001.played
//! │   └── <remote id>.remote      # Dedup marker holding the local index
//! └── tmp/                        # Scratch space for archive extraction
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod http;
pub mod layout;
pub mod models;
pub mod pipeline;
pub mod pool;
pub mod preload;
pub mod store;
pub mod synth;
pub mod tracker;

pub use config::Config;
pub use error::{PoolError, Result};
pub use models::{Category, ContentRecord, Descriptor, RankingRecord, RecordKind};
pub use pipeline::{CycleReport, CycleState};
pub use pool::CoursePool;
pub use store::ContentStore;
