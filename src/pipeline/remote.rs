//! Remote course catalog client

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::config::RemoteConfig;
use crate::error::{PoolError, Result};
use crate::models::Category;

/// A listing entry from the remote catalog
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteCourse {
    pub id: String,
    #[serde(rename = "courseTheme", default)]
    pub course_theme: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub maker: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub uploaded: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub lastmodified: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub stars: u64,
    /// Everything else the catalog sends
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Accept integers, floats, numeric strings and null
fn lenient_u64<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| f.max(0.0) as u64))
            .unwrap_or(0),
        serde_json::Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

/// Source of new courses
#[async_trait]
pub trait RemoteCatalog: Send + Sync {
    /// One page of courses of a category. An empty page ends the listing.
    async fn list(&self, category: Category, page: u32, page_size: u32) -> Result<Vec<RemoteCourse>>;

    /// Zip archive holding the course assets
    async fn download_archive(&self, remote_id: &str) -> Result<Vec<u8>>;
}

/// HTTP client for the SMMDB catalog API
pub struct SmmdbClient {
    client: reqwest::Client,
    base_url: String,
    random: bool,
}

impl SmmdbClient {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| PoolError::Remote(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            random: config.random,
        })
    }
}

#[async_trait]
impl RemoteCatalog for SmmdbClient {
    async fn list(&self, category: Category, page: u32, page_size: u32) -> Result<Vec<RemoteCourse>> {
        let url = format!("{}/getcourses", self.base_url);
        let difficulty = category.index().to_string();
        let mut query = vec![
            ("limit", page_size.to_string()),
            ("start", (page as u64 * page_size as u64).to_string()),
            ("difficultyfrom", difficulty.clone()),
            ("difficultyto", difficulty),
        ];
        if self.random {
            query.push(("random", "1".to_string()));
        }

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| PoolError::Remote(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PoolError::Remote(format!(
                "getcourses returned {}",
                response.status()
            )));
        }

        let courses: Vec<RemoteCourse> = response
            .json()
            .await
            .map_err(|e| PoolError::Remote(format!("getcourses body: {}", e)))?;
        debug!(%category, page, count = courses.len(), "Listed remote courses");
        Ok(courses)
    }

    async fn download_archive(&self, remote_id: &str) -> Result<Vec<u8>> {
        let url = format!("{}/downloadcourse", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("id", remote_id), ("type", "zip")])
            .send()
            .await
            .map_err(|e| PoolError::Remote(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PoolError::Remote(format!(
                "downloadcourse {} returned {}",
                remote_id,
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PoolError::Remote(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Exponential backoff for listing retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RemoteConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}
