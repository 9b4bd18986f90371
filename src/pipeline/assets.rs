//! Course archive extraction and asset compression

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tracing::debug;

use crate::config::CompressConfig;
use crate::error::{PoolError, Result};

/// Asset file names, in payload chunk order
pub const ASSET_NAMES: [&str; 4] = [
    "thumbnail0.tnl",
    "course_data.cdt",
    "course_data_sub.cdt",
    "thumbnail1.tnl",
];

/// The four raw assets of a course, written out for the compression tools
#[derive(Debug, Clone)]
pub struct CourseAssets {
    /// Paths in chunk order (chunk1..chunk4)
    pub paths: [PathBuf; 4],
}

/// Extract the four course assets from a zip archive into `dest`.
///
/// Assets are matched by file name wherever they sit in the archive; any
/// missing asset fails the candidate.
pub async fn extract_course_assets(archive: &[u8], dest: &Path) -> Result<CourseAssets> {
    let files = read_named_entries(archive)?;

    fs::create_dir_all(dest).await?;
    let mut paths: [PathBuf; 4] = Default::default();
    for (slot, name) in ASSET_NAMES.iter().enumerate() {
        let data = files
            .get(*name)
            .ok_or_else(|| PoolError::Archive(format!("archive has no {}", name)))?;
        let path = dest.join(name);
        fs::write(&path, data).await?;
        paths[slot] = path;
    }
    Ok(CourseAssets { paths })
}

fn read_named_entries(archive: &[u8]) -> Result<HashMap<String, Vec<u8>>> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))
        .map_err(|e| PoolError::Archive(e.to_string()))?;
    let mut files = HashMap::new();

    for i in 0..zip.len() {
        let mut file = zip
            .by_index(i)
            .map_err(|e| PoolError::Archive(e.to_string()))?;
        if !file.is_file() {
            continue;
        }
        let Some(name) = file.name().rsplit('/').next().map(str::to_string) else {
            continue;
        };
        if !ASSET_NAMES.contains(&name.as_str()) {
            continue;
        }
        if files.contains_key(&name) {
            return Err(PoolError::Archive(format!("archive has more than one {}", name)));
        }
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        files.insert(name, contents);
    }

    Ok(files)
}

/// Compresses one asset into its payload chunk
#[async_trait]
pub trait AssetCompressor: Send + Sync {
    /// Compressed bytes of `asset`; fails with `AssetFidelity` when the
    /// result does not decompress back to the original
    async fn compress(&self, asset: &Path) -> Result<Vec<u8>>;
}

/// Two-stage external tool chain: compress, then decompress and compare
pub struct ToolchainCompressor {
    config: CompressConfig,
}

impl ToolchainCompressor {
    pub fn new(config: CompressConfig) -> Self {
        Self { config }
    }

    async fn run_tool(&self, tool: &str, arg: &Path) -> Result<()> {
        let status = Command::new(tool)
            .arg(arg)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| PoolError::AssetFidelity(format!("cannot run {}: {}", tool, e)))?;

        if !status.success() {
            return Err(PoolError::AssetFidelity(format!(
                "{} {} exited with {}",
                tool,
                arg.display(),
                status
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl AssetCompressor for ToolchainCompressor {
    async fn compress(&self, asset: &Path) -> Result<Vec<u8>> {
        let compressed = append_suffix(asset, &self.config.compressed_suffix);
        let roundtrip = append_suffix(&compressed, &self.config.roundtrip_suffix);

        self.run_tool(&self.config.compress_tool, asset).await?;
        self.run_tool(&self.config.decompress_tool, &compressed).await?;

        let original = read_output(asset).await?;
        let restored = read_output(&roundtrip).await?;
        verify_lossless(asset, &original, &restored)?;

        let bytes = read_output(&compressed).await?;
        debug!(
            asset = %asset.display(),
            raw = original.len(),
            compressed = bytes.len(),
            "Compressed asset"
        );
        Ok(bytes)
    }
}

async fn read_output(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).await.map_err(|e| {
        PoolError::AssetFidelity(format!("cannot read {}: {}", path.display(), e))
    })
}

/// Byte-for-byte comparison of an asset and its decompressed round trip
pub fn verify_lossless(asset: &Path, original: &[u8], restored: &[u8]) -> Result<()> {
    if original != restored {
        return Err(PoolError::AssetFidelity(format!(
            "round trip of {} differs ({} vs {} bytes)",
            asset.display(),
            original.len(),
            restored.len()
        )));
    }
    Ok(())
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}
