//! Pool configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PoolError, Result};
use crate::models::Category;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub compress: CompressConfig,
    #[serde(default)]
    pub preload: PreloadConfig,
    #[serde(default)]
    pub synth: SynthConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Read a config file, falling back to defaults when it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| PoolError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool.quotas.len() != Category::ALL.len() {
            return Err(PoolError::Config(format!(
                "pool.quotas needs {} entries, got {}",
                Category::ALL.len(),
                self.pool.quotas.len()
            )));
        }
        if self.remote.page_size == 0 {
            return Err(PoolError::Config("remote.page_size must be > 0".to_string()));
        }
        if self.synth.id_base <= self.synth.owner_base {
            return Err(PoolError::Config(
                "synth.id_base must be above synth.owner_base".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pool layout and serving options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Root of the on-disk pool
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Target unplayed count per category, in category order
    #[serde(default = "default_quotas")]
    pub quotas: Vec<usize>,

    /// Public URL the data directory is reachable under
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Owner whose avatar is served when an avatar lookup misses
    #[serde(default = "default_avatar_owner")]
    pub default_avatar_owner: Option<u64>,

    /// Course ids dropped while hydrating the preloaded course set
    #[serde(default = "default_excluded_course_ids")]
    pub excluded_course_ids: Vec<u64>,
}

impl PoolConfig {
    pub fn quota(&self, category: Category) -> usize {
        self.quotas.get(category.index()).copied().unwrap_or(0)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            quotas: default_quotas(),
            public_base_url: default_public_base_url(),
            default_avatar_owner: default_avatar_owner(),
            excluded_course_ids: default_excluded_course_ids(),
        }
    }
}

/// Remote catalog access
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_remote_url")]
    pub base_url: String,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Ask the catalog for a random ordering
    #[serde(default = "default_true")]
    pub random: bool,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Attempts per page before the category is abandoned
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,

    /// Randomized listings never run dry, so pages are capped too
    #[serde(default = "default_max_pages")]
    pub max_pages_per_category: u32,
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_remote_url(),
            page_size: default_page_size(),
            random: true,
            request_timeout_secs: default_request_timeout(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
            max_pages_per_category: default_max_pages(),
        }
    }
}

/// External compression tool chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressConfig {
    /// Compressor, invoked as `<tool> <asset>`, writes `<asset><compressed_suffix>`
    #[serde(default = "default_compress_tool")]
    pub compress_tool: String,

    /// Decompressor, invoked on the compressed file, writes `<compressed><roundtrip_suffix>`
    #[serde(default = "default_decompress_tool")]
    pub decompress_tool: String,

    #[serde(default = "default_compressed_suffix")]
    pub compressed_suffix: String,

    #[serde(default = "default_roundtrip_suffix")]
    pub roundtrip_suffix: String,
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self {
            compress_tool: default_compress_tool(),
            decompress_tool: default_decompress_tool(),
            compressed_suffix: default_compressed_suffix(),
            roundtrip_suffix: default_roundtrip_suffix(),
        }
    }
}

/// Preload archive locations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreloadConfig {
    #[serde(default)]
    pub top_courses: Option<PathBuf>,
    #[serde(default)]
    pub courses: Option<PathBuf>,
    #[serde(default)]
    pub avatars: Option<PathBuf>,
    #[serde(default)]
    pub rankings: Option<PathBuf>,
    #[serde(default)]
    pub buffer_queues: Option<PathBuf>,
}

/// Reserved ranges for synthetic identities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthConfig {
    #[serde(default = "default_synth_id_base")]
    pub id_base: u64,

    #[serde(default = "default_synth_owner_base")]
    pub owner_base: u64,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            id_base: default_synth_id_base(),
            owner_base: default_synth_owner_base(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            http_port: default_http_port(),
        }
    }
}

// Defaults
fn default_data_dir() -> PathBuf { PathBuf::from("www/smmdb") }
fn default_quotas() -> Vec<usize> { vec![400; 4] }
fn default_public_base_url() -> String { "http://account.nintendo.net/smmdb".to_string() }
fn default_avatar_owner() -> Option<u64> { Some(1_781_058_687) }
fn default_excluded_course_ids() -> Vec<u64> { vec![21_340_114] }
fn default_remote_url() -> String { "https://smmdb.ddns.net/api".to_string() }
fn default_page_size() -> u32 { 100 }
fn default_true() -> bool { true }
fn default_request_timeout() -> u64 { 30 }
fn default_max_attempts() -> u32 { 5 }
fn default_retry_base_delay() -> u64 { 500 }
fn default_retry_max_delay() -> u64 { 30_000 }
fn default_max_pages() -> u32 { 50 }
fn default_compress_tool() -> String { "ashcompress".to_string() }
fn default_decompress_tool() -> String { "ASH".to_string() }
fn default_compressed_suffix() -> String { ".ash".to_string() }
fn default_roundtrip_suffix() -> String { ".arc".to_string() }
fn default_synth_id_base() -> u64 { 20_000_000_000 }
fn default_synth_owner_base() -> u64 { 2_000_000_000 }
fn default_http_port() -> u16 { 8080 }
