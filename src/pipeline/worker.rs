//! Worker pool applying queued updates
//!
//! Workers apply through an [`OrderedSink`], which keeps log order for
//! updates to the same row even when two workers pick them up out of order.

use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};
use vecsync_core::{TableUpdateSink, UpdateItem};

use super::queue::UpdateQueue;
use super::stats::PipelineStats;

const STRIPES: usize = 64;

/// What happened to an update handed to the [`OrderedSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Passed to the underlying sink
    Applied,
    /// Skipped: a later change to the same row was already applied
    Superseded,
}

/// Wraps a sink so that, per `(index, row id)`, the item with the highest
/// sequence number wins.
///
/// The last applied sequence of each row is remembered in one of a fixed set
/// of striped maps. The stripe lock is held across the inner apply, so two
/// updates to the same row never run concurrently.
pub struct OrderedSink {
    inner: Arc<dyn TableUpdateSink>,
    stripes: Vec<Mutex<HashMap<(String, u64), u64>>>,
    hasher: RandomState,
}

impl OrderedSink {
    /// Order updates applied to `inner`.
    pub fn new(inner: Arc<dyn TableUpdateSink>) -> Self {
        Self {
            inner,
            stripes: (0..STRIPES).map(|_| Mutex::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
        }
    }

    /// Apply `item` unless a newer update to the same row already was.
    pub fn apply(&self, item: &UpdateItem) -> vecsync_core::Result<ApplyOutcome> {
        let key = (item.index_key(), item.row_id);
        let stripe = (self.hasher.hash_one(&key) as usize) % STRIPES;
        let mut latest = self.stripes[stripe].lock();

        if matches!(latest.get(&key), Some(&seq) if seq > item.seq) {
            return Ok(ApplyOutcome::Superseded);
        }
        self.inner.apply(item)?;
        latest.insert(key, item.seq);
        Ok(ApplyOutcome::Applied)
    }

    /// Forget every remembered sequence.
    ///
    /// Only safe while nothing is queued or in flight.
    pub fn reset(&self) {
        for stripe in &self.stripes {
            stripe.lock().clear();
        }
    }

    /// Number of rows with a remembered sequence
    pub fn tracked_rows(&self) -> usize {
        self.stripes.iter().map(|s| s.lock().len()).sum()
    }
}

/// Joinable worker threads draining one [`UpdateQueue`].
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers.
    ///
    /// If a thread cannot be spawned the queue is shut down, the workers
    /// already started are joined and the error is returned.
    pub fn spawn(
        count: usize,
        queue: Arc<UpdateQueue>,
        sink: Arc<OrderedSink>,
        stats: Arc<PipelineStats>,
    ) -> io::Result<Self> {
        let mut pool = WorkerPool {
            handles: Vec::with_capacity(count),
        };
        for id in 0..count {
            let queue_for_worker = queue.clone();
            let sink = sink.clone();
            let stats = stats.clone();
            let spawned = thread::Builder::new()
                .name(format!("vecsync-worker-{id}"))
                .spawn(move || worker_loop(id, &queue_for_worker, &sink, &stats));
            match spawned {
                Ok(handle) => pool.handles.push(handle),
                Err(e) => {
                    queue.shutdown();
                    pool.join();
                    return Err(e);
                }
            }
        }
        debug!(workers = count, "worker pool started");
        Ok(pool)
    }

    /// Number of worker threads
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether the pool has no threads
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to exit. The queue must already be shut down.
    pub fn join(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                error!("vector update worker terminated abnormally");
            }
        }
    }
}

fn worker_loop(id: usize, queue: &UpdateQueue, sink: &OrderedSink, stats: &PipelineStats) {
    trace!(worker = id, "worker started");
    while let Some(item) = queue.dequeue() {
        match panic::catch_unwind(AssertUnwindSafe(|| sink.apply(&item))) {
            Ok(Ok(ApplyOutcome::Applied)) => PipelineStats::incr(&stats.rows_applied),
            Ok(Ok(ApplyOutcome::Superseded)) => {
                trace!(row_id = item.row_id, seq = item.seq, "update superseded");
                PipelineStats::incr(&stats.rows_superseded);
            }
            Ok(Err(e)) => {
                warn!(
                    index = %item.index_key(),
                    row_id = item.row_id,
                    origin = %item.origin,
                    error = %e,
                    "failed to apply vector update"
                );
                PipelineStats::incr(&stats.apply_failures);
            }
            Err(_) => {
                error!(
                    index = %item.index_key(),
                    row_id = item.row_id,
                    "vector update panicked"
                );
                PipelineStats::incr(&stats.apply_failures);
            }
        }
        queue.task_done();
    }
    trace!(worker = id, "worker exiting");
}
