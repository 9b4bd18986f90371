//! Course pool runtime
//!
//! Wires the content store, the synthesizer, the replenishment worker and the
//! played tracker together and exposes the operations the protocol layer
//! calls.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::layout::PoolLayout;
use crate::models::{Category, ContentRecord, RankingRecord};
use crate::pipeline::{
    AssetCompressor, CycleReport, CycleState, FetchQueue, Pipeline, PipelineSettings,
    QueueStats, RemoteCatalog,
};
use crate::preload::{BulkData, SequenceDecoder};
use crate::store::{ContentStore, PoolStats};
use crate::synth::Synthesizer;
use crate::tracker::PlayedTracker;

pub struct CoursePool {
    store: Arc<ContentStore>,
    synth: Arc<Synthesizer>,
    tracker: PlayedTracker,
    queue: FetchQueue,
    state: watch::Receiver<CycleState>,
    worker: JoinHandle<()>,
}

impl CoursePool {
    /// Open the pool, hydrate preload archives and start the replenishment worker.
    ///
    /// No cycle runs until one is triggered; call [`CoursePool::warm_up`]
    /// before serving.
    pub async fn start(
        config: &Config,
        remote: Arc<dyn RemoteCatalog>,
        compressor: Arc<dyn AssetCompressor>,
        decoder: &dyn SequenceDecoder,
    ) -> Result<Self> {
        config.validate()?;

        let layout = PoolLayout::new(&config.pool.data_dir);
        let store = Arc::new(
            ContentStore::open(
                layout,
                config.pool.public_base_url.clone(),
                config.pool.default_avatar_owner,
            )
            .await?,
        );

        let bulk = BulkData::load(&config.preload, decoder, &config.pool.excluded_course_ids).await?;
        store.hydrate(bulk).await;

        let synth = Arc::new(Synthesizer::new(store.clone(), &config.synth));

        let pipeline = Pipeline::new(
            store.clone(),
            remote,
            compressor,
            PipelineSettings::from_config(config),
        )
        .await?;
        let state = pipeline.subscribe();
        let (queue, jobs) = FetchQueue::channel();
        let worker = pipeline.spawn(jobs);

        let tracker = PlayedTracker::new(store.clone(), queue.clone());

        info!(data_dir = %config.pool.data_dir.display(), "Course pool started");

        Ok(Self {
            store,
            synth,
            tracker,
            queue,
            state,
            worker,
        })
    }

    /// Run one replenishment cycle and wait for it
    pub async fn warm_up(&self) -> Result<CycleReport> {
        self.queue.trigger_and_wait().await
    }

    pub fn store(&self) -> &Arc<ContentStore> {
        &self.store
    }

    pub async fn lookup_by_id(&self, id: u64) -> Result<ContentRecord> {
        self.store.lookup_by_id(id, self.synth.as_ref()).await
    }

    pub async fn lookup_owner_avatar(&self, owner_id: u64) -> Result<ContentRecord> {
        self.store.lookup_owner_avatar(owner_id).await
    }

    pub async fn lookup_owner_avatar_or_default(&self, owner_id: u64) -> Result<ContentRecord> {
        self.store.lookup_owner_avatar_or_default(owner_id).await
    }

    pub async fn lookup_avatar(&self, id: u64) -> Result<ContentRecord> {
        self.store.lookup_avatar(id).await
    }

    pub async fn sample_unplayed(&self, category: Category, count: usize) -> Result<Vec<ContentRecord>> {
        self.store
            .sample_unplayed(category, count, self.synth.as_ref())
            .await
    }

    pub async fn mark_played(&self, id: u64) -> Result<bool> {
        self.tracker.mark_played(id).await
    }

    pub async fn is_played(&self, id: u64) -> bool {
        self.tracker.is_played(id).await
    }

    pub async fn synthesize_owner(&self, name: &str) -> Result<u64> {
        self.synth.synthesize_owner(name).await
    }

    pub async fn lookup_ranking(&self, id: u64) -> Result<RankingRecord> {
        self.store.lookup_ranking(id).await
    }

    pub async fn course_url(&self, id: u64) -> Result<String> {
        self.store.course_url(id).await
    }

    pub async fn read_payload(&self, id: u64) -> Result<Vec<u8>> {
        self.store.read_payload(id).await
    }

    pub async fn top_courses(&self) -> Vec<ContentRecord> {
        self.store.top_courses().await
    }

    pub async fn buffer_queue(&self, id: u64) -> Result<Vec<Bytes>> {
        self.store.buffer_queue(id).await
    }

    pub async fn stats(&self) -> PoolStats {
        self.store.stats().await
    }

    pub fn cycle_state(&self) -> CycleState {
        *self.state.borrow()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Close the queue and wait for the worker to finish its current cycle
    pub async fn shutdown(self) {
        let Self {
            tracker,
            queue,
            worker,
            ..
        } = self;
        drop(tracker);
        drop(queue);
        if let Err(e) = worker.await {
            tracing::warn!(error = %e, "Replenishment worker ended abnormally");
        }
    }
}
