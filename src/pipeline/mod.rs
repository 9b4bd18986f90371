//! Replenishment pipeline
//!
//! A single background worker keeps every category topped up to its quota of
//! unplayed courses:
//! 1. Count unplayed payloads in the category directory
//! 2. Page through the remote catalog until the deficit is covered
//! 3. Per candidate: download, extract, compress each asset through the
//!    external tool chain and verify the round trip
//! 4. Write the descriptor, the payload and the dedup marker under the next
//!    local index
//!
//! Candidate failures are logged and skipped. Listing failures are retried
//! with backoff and abort only the current category once attempts run out.

pub mod assets;
pub mod queue;
pub mod remote;

use std::sync::Arc;

use serde::Serialize;
use tokio::fs;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec::MetaHeader;
use crate::config::Config;
use crate::error::{PoolError, Result};
use crate::layout::{self, DiskEntry, PoolLayout, FIRST_LOCAL_ID};
use crate::models::{Category, Descriptor};
use crate::store::ContentStore;

pub use assets::{AssetCompressor, ToolchainCompressor};
pub use queue::{FetchJob, FetchQueue, QueueStats, Trigger};
pub use remote::{RemoteCatalog, RemoteCourse, RetryPolicy, SmmdbClient};

/// Descriptor keys owned by the pool; remote fields with these names are dropped
const RESERVED_KEYS: [&str; 11] = [
    "index",
    "remote_id",
    "title",
    "maker",
    "category",
    "theme",
    "uploaded",
    "lastmodified",
    "stars",
    "size",
    "meta_binary",
];

/// What the worker is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "category", rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    Scanning(Category),
    Fetching(Category),
    Writing(Category),
}

/// Outcome of one category within a cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryReport {
    pub category: Category,
    pub unplayed_before: usize,
    pub deficit: usize,
    pub fetched: usize,
    /// Indices written during this cycle, in allocation order
    pub written: Vec<u64>,
    /// Listing failed past the retry budget
    pub aborted: bool,
}

impl CategoryReport {
    pub fn shortfall(&self) -> usize {
        self.deficit.saturating_sub(self.fetched)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub categories: Vec<CategoryReport>,
}

impl CycleReport {
    pub fn fetched(&self) -> usize {
        self.categories.iter().map(|c| c.fetched).sum()
    }
}

/// Tunables taken from [`Config`]
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub quotas: [usize; 4],
    pub page_size: u32,
    pub max_pages: u32,
    pub retry: RetryPolicy,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        let mut quotas = [0usize; 4];
        for category in Category::ALL {
            quotas[category.index()] = config.pool.quota(category);
        }
        Self {
            quotas,
            page_size: config.remote.page_size,
            max_pages: config.remote.max_pages_per_category,
            retry: RetryPolicy::from_config(&config.remote),
        }
    }
}

pub struct Pipeline {
    layout: PoolLayout,
    store: Arc<ContentStore>,
    remote: Arc<dyn RemoteCatalog>,
    compressor: Arc<dyn AssetCompressor>,
    settings: PipelineSettings,
    next_index: u64,
    state: watch::Sender<CycleState>,
}

impl Pipeline {
    /// Create the pipeline, scanning the pool once for the highest index
    pub async fn new(
        store: Arc<ContentStore>,
        remote: Arc<dyn RemoteCatalog>,
        compressor: Arc<dyn AssetCompressor>,
        settings: PipelineSettings,
    ) -> Result<Self> {
        let layout = store.layout().clone();
        layout.ensure_dirs().await?;
        let next_index = layout
            .list_all()
            .await?
            .iter()
            .map(|e| e.id + 1)
            .max()
            .unwrap_or(FIRST_LOCAL_ID)
            .max(FIRST_LOCAL_ID);
        let (state, _) = watch::channel(CycleState::Idle);

        info!(next_index, "Replenishment pipeline ready");

        Ok(Self {
            layout,
            store,
            remote,
            compressor,
            settings,
            next_index,
            state,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<CycleState> {
        self.state.subscribe()
    }

    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Run the worker on its own task, consuming `jobs` until the queue closes
    pub fn spawn(self, jobs: mpsc::Receiver<FetchJob>) -> JoinHandle<()> {
        tokio::spawn(self.run(jobs))
    }

    pub async fn run(mut self, mut jobs: mpsc::Receiver<FetchJob>) {
        while let Some(job) = jobs.recv().await {
            debug!(waited_on = job.is_waited_on(), "Starting replenishment cycle");
            let report = self.run_cycle().await;
            job.complete(&report);
        }
        debug!("Fetch queue closed, replenishment worker exiting");
    }

    /// One full pass over every category
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        for category in Category::ALL {
            report.categories.push(self.fill_category(category).await);
        }
        self.set_state(CycleState::Idle);

        info!(fetched = report.fetched(), "Replenishment cycle finished");
        report
    }

    async fn fill_category(&mut self, category: Category) -> CategoryReport {
        self.set_state(CycleState::Scanning(category));
        let quota = self.settings.quotas[category.index()];
        let mut report = CategoryReport {
            category,
            unplayed_before: 0,
            deficit: 0,
            fetched: 0,
            written: Vec::new(),
            aborted: false,
        };

        // quarantined entries do not count toward the quota
        let unplayed = match self.layout.list_entries(category).await {
            Ok(entries) => self.store.count_servable_unplayed(&entries).await,
            Err(e) => {
                warn!(%category, error = %e, "Cannot scan category directory");
                report.aborted = true;
                return report;
            }
        };
        report.unplayed_before = unplayed;

        if unplayed >= quota {
            info!(%category, unplayed, quota, "Nothing to fetch");
            return report;
        }
        report.deficit = quota - unplayed;
        info!(%category, deficit = report.deficit, "Fetching courses");

        self.set_state(CycleState::Fetching(category));
        let mut page = 0;
        'pages: while report.fetched < report.deficit && page < self.settings.max_pages {
            let candidates = match self.list_with_retry(category, page).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(%category, page, error = %e, "Giving up on category for this cycle");
                    report.aborted = true;
                    break;
                }
            };
            if candidates.is_empty() {
                info!(%category, page, "Remote catalog exhausted");
                break;
            }

            for candidate in &candidates {
                if report.fetched >= report.deficit {
                    break 'pages;
                }
                match self.ingest(category, candidate).await {
                    Ok(Some(index)) => {
                        report.fetched += 1;
                        report.written.push(index);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(%category, remote_id = %candidate.id, error = %e, "Skipping candidate");
                    }
                }
                self.set_state(CycleState::Fetching(category));
            }
            page += 1;
        }

        if report.shortfall() > 0 {
            warn!(
                %category,
                fetched = report.fetched,
                shortfall = report.shortfall(),
                "Category still below quota"
            );
        }
        report
    }

    async fn list_with_retry(&self, category: Category, page: u32) -> Result<Vec<RemoteCourse>> {
        let policy = self.settings.retry;
        let mut attempt = 0;
        loop {
            match self
                .remote
                .list(category, page, self.settings.page_size)
                .await
            {
                Ok(courses) => return Ok(courses),
                Err(e) if attempt + 1 < policy.max_attempts => {
                    let delay = policy.delay(attempt);
                    warn!(
                        %category,
                        page,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Catalog listing failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Bring one candidate into the pool. `Ok(None)` means already present.
    async fn ingest(&mut self, category: Category, candidate: &RemoteCourse) -> Result<Option<u64>> {
        if !layout::is_safe_remote_id(&candidate.id) {
            return Err(PoolError::InvalidArgument(format!(
                "unusable remote id {:?}",
                candidate.id
            )));
        }
        let dedup = self.layout.dedup_marker(category, &candidate.id);
        if fs::try_exists(&dedup).await? {
            info!(%category, remote_id = %candidate.id, "Already fetched, skipping");
            return Ok(None);
        }

        let archive = self.remote.download_archive(&candidate.id).await?;

        let scratch = self
            .layout
            .scratch_dir()
            .join(uuid::Uuid::new_v4().to_string());
        let chunks = self.compress_assets(&archive, &scratch).await;
        if let Err(e) = fs::remove_dir_all(&scratch).await {
            debug!(path = %scratch.display(), error = %e, "Scratch cleanup failed");
        }
        let chunks = chunks?;

        self.set_state(CycleState::Writing(category));
        let header = MetaHeader::from_chunks(
            candidate.course_theme,
            [
                chunks[0].as_slice(),
                chunks[1].as_slice(),
                chunks[2].as_slice(),
                chunks[3].as_slice(),
            ],
        );
        let index = self.allocate_index();
        self.write_entry(category, index, candidate, &header, &chunks)
            .await?;

        info!(%category, remote_id = %candidate.id, index, size = header.payload_size(), "Stored course");
        Ok(Some(index))
    }

    async fn compress_assets(&self, archive: &[u8], scratch: &std::path::Path) -> Result<Vec<Vec<u8>>> {
        let assets = assets::extract_course_assets(archive, scratch).await?;
        let mut chunks = Vec::with_capacity(assets.paths.len());
        for path in &assets.paths {
            chunks.push(self.compressor.compress(path).await?);
        }
        Ok(chunks)
    }

    /// Indices only ever grow; a failed write burns its index
    fn allocate_index(&mut self) -> u64 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    async fn write_entry(
        &self,
        category: Category,
        index: u64,
        candidate: &RemoteCourse,
        header: &MetaHeader,
        chunks: &[Vec<u8>],
    ) -> Result<()> {
        let mut extra = candidate.extra.clone();
        extra.retain(|k, _| !RESERVED_KEYS.contains(&k.as_str()));

        let descriptor = Descriptor {
            index,
            remote_id: candidate.id.clone(),
            title: candidate.title.clone(),
            maker: candidate.maker.clone(),
            category,
            theme: candidate.course_theme,
            uploaded: candidate.uploaded,
            lastmodified: candidate.lastmodified,
            stars: candidate.stars.min(u32::MAX as u64) as u32,
            size: header.payload_size(),
            meta_binary: header.encode().to_vec(),
            extra,
        };

        // sidecar first: a visible payload always has its descriptor
        let payload_path = self.layout.payload_path(category, index);
        fs::write(
            layout::sidecar_path(&payload_path),
            serde_json::to_vec(&descriptor)?,
        )
        .await?;
        fs::write(&payload_path, chunks.concat()).await?;
        fs::write(
            self.layout.dedup_marker(category, &candidate.id),
            index.to_string(),
        )
        .await?;

        self.store
            .register_entry(DiskEntry {
                id: index,
                category,
                path: payload_path,
                played: false,
            })
            .await;
        Ok(())
    }

    fn set_state(&self, state: CycleState) {
        self.state.send_replace(state);
    }
}
