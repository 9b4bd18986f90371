//! Single-consumer fetch queue
//!
//! The channel holds at most one pending job. While a cycle runs, the first
//! fire-and-forget trigger queues a trailing cycle and later ones coalesce
//! into it; a trailing cycle observes the latest deficits anyway. Waiting
//! callers always enqueue their own job and resolve when it completes, which
//! is after every job queued ahead of them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use super::CycleReport;
use crate::error::{PoolError, Result};

/// A request for one replenishment cycle
pub struct FetchJob {
    pub(crate) done: Option<oneshot::Sender<CycleReport>>,
}

impl FetchJob {
    /// Resolve the waiter, if any
    pub fn complete(self, report: &CycleReport) {
        if let Some(done) = self.done {
            let _ = done.send(report.clone());
        }
    }

    pub fn is_waited_on(&self) -> bool {
        self.done.is_some()
    }
}

/// Outcome of a fire-and-forget trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A new cycle was queued
    Queued,
    /// A cycle was already pending and will cover this request
    Coalesced,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: u64,
    pub coalesced: u64,
}

#[derive(Default)]
struct Counters {
    queued: AtomicU64,
    coalesced: AtomicU64,
}

#[derive(Clone)]
pub struct FetchQueue {
    tx: mpsc::Sender<FetchJob>,
    counters: Arc<Counters>,
}

impl FetchQueue {
    /// Create the queue and the receiver the worker consumes
    pub fn channel() -> (Self, mpsc::Receiver<FetchJob>) {
        let (tx, rx) = mpsc::channel(1);
        (
            Self {
                tx,
                counters: Arc::new(Counters::default()),
            },
            rx,
        )
    }

    /// Request a cycle without waiting for it
    pub fn trigger(&self) -> Result<Trigger> {
        match self.tx.try_send(FetchJob { done: None }) {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                Ok(Trigger::Queued)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                Ok(Trigger::Coalesced)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PoolError::QueueClosed),
        }
    }

    /// Request a cycle and wait until it has run
    pub async fn trigger_and_wait(&self) -> Result<CycleReport> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(FetchJob {
                done: Some(done_tx),
            })
            .await
            .map_err(|_| PoolError::QueueClosed)?;
        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        done_rx.await.map_err(|_| PoolError::QueueClosed)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queued: self.counters.queued.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
        }
    }
}
