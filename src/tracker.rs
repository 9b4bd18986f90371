//! Played-state tracking
//!
//! A course is played once its zero-byte `.played` marker exists. Markers are
//! created with `create_new`, so concurrent calls for the same id agree on a
//! single winner and only that call requests a replenishment cycle.

use std::io::ErrorKind;
use std::sync::Arc;

use tokio::fs::OpenOptions;
use tracing::{debug, info, warn};

use crate::error::{PoolError, Result};
use crate::layout;
use crate::pipeline::{FetchQueue, Trigger};
use crate::store::ContentStore;

pub struct PlayedTracker {
    store: Arc<ContentStore>,
    queue: FetchQueue,
}

impl PlayedTracker {
    pub fn new(store: Arc<ContentStore>, queue: FetchQueue) -> Self {
        Self { store, queue }
    }

    /// Mark `id` as played.
    ///
    /// Returns `true` only for the call that created the marker. Ids without an
    /// on-disk entry are ignored.
    pub async fn mark_played(&self, id: u64) -> Result<bool> {
        let entry = match self.store.locate(id).await {
            Ok(entry) => entry,
            Err(PoolError::NotFound(_)) => {
                debug!(id, "Ignoring played mark for unknown course");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let marker = layout::played_marker(&entry.path);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&marker)
            .await
        {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                self.store.set_played(id).await;
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }

        self.store.set_played(id).await;
        match self.queue.trigger() {
            Ok(Trigger::Queued) => info!(id, category = %entry.category, "Course played, replenishment queued"),
            Ok(Trigger::Coalesced) => debug!(id, "Course played, replenishment already pending"),
            Err(e) => warn!(id, error = %e, "Could not queue replenishment"),
        }
        Ok(true)
    }

    pub async fn is_played(&self, id: u64) -> bool {
        self.store.is_played(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{DiskEntry, PoolLayout};
    use crate::models::Category;
    use tempfile::TempDir;

    async fn setup(temp_dir: &TempDir) -> (PlayedTracker, tokio::sync::mpsc::Receiver<crate::pipeline::FetchJob>, PoolLayout) {
        let layout = PoolLayout::new(temp_dir.path());
        layout.ensure_dirs().await.unwrap();
        let path = layout.payload_path(Category::Easy, 10_000_000_000);
        std::fs::write(&path, b"payload").unwrap();

        let store = Arc::new(
            ContentStore::open(layout.clone(), "http://host", None)
                .await
                .unwrap(),
        );
        store
            .register_entry(DiskEntry {
                id: 10_000_000_000,
                category: Category::Easy,
                path,
                played: false,
            })
            .await;
        let (queue, rx) = FetchQueue::channel();
        (PlayedTracker::new(store, queue), rx, layout)
    }

    #[tokio::test]
    async fn test_mark_played_enqueues_once() {
        let temp_dir = TempDir::new().unwrap();
        let (tracker, mut rx, layout) = setup(&temp_dir).await;

        assert!(!tracker.is_played(10_000_000_000).await);
        assert!(tracker.mark_played(10_000_000_000).await.unwrap());
        assert!(tracker.is_played(10_000_000_000).await);
        assert!(layout::played_marker(&layout.payload_path(Category::Easy, 10_000_000_000)).exists());

        // drain so a second enqueue would be observable
        assert!(rx.try_recv().is_ok());
        assert!(!tracker.mark_played(10_000_000_000).await.unwrap());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_existing_marker_is_respected() {
        let temp_dir = TempDir::new().unwrap();
        let (tracker, mut rx, layout) = setup(&temp_dir).await;
        let path = layout.payload_path(Category::Easy, 10_000_000_000);
        std::fs::write(layout::played_marker(&path), b"").unwrap();

        assert!(!tracker.mark_played(10_000_000_000).await.unwrap());
        assert!(tracker.is_played(10_000_000_000).await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_id_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let (tracker, mut rx, _layout) = setup(&temp_dir).await;
        assert!(!tracker.mark_played(42).await.unwrap());
        assert!(!tracker.is_played(42).await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_marks_have_single_winner() {
        let temp_dir = TempDir::new().unwrap();
        let (tracker, mut rx, _layout) = setup(&temp_dir).await;
        let tracker = Arc::new(tracker);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = tracker.clone();
                tokio::spawn(async move { tracker.mark_played(10_000_000_000).await })
            })
            .collect();
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert!(tracker.is_played(10_000_000_000).await);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
