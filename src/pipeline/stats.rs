//! Pipeline counters
//!
//! Updated with relaxed atomics from the decode thread and the workers; read
//! as a [`PipelineStatsSnapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters shared by the decode thread and the workers.
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Events read from the server
    pub events_fetched: AtomicU64,
    /// Events of types the pipeline does not consume
    pub events_ignored: AtomicU64,
    /// Table maps decoded for tracked tables
    pub table_maps: AtomicU64,
    /// Update items queued for the workers
    pub rows_enqueued: AtomicU64,
    /// Update items applied to an index
    pub rows_applied: AtomicU64,
    /// Update items skipped because a later change to the same row was applied
    pub rows_superseded: AtomicU64,
    /// Update items the sink rejected
    pub apply_failures: AtomicU64,
    /// Events dropped as malformed
    pub decode_errors: AtomicU64,
    /// Binlog rotations handled
    pub rotations: AtomicU64,
    /// Checkpoint and index saves that failed
    pub checkpoint_failures: AtomicU64,
    /// Reconnects after a lost stream
    pub reconnects: AtomicU64,
}

impl PipelineStats {
    /// Zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            events_fetched: self.events_fetched.load(Ordering::Relaxed),
            events_ignored: self.events_ignored.load(Ordering::Relaxed),
            table_maps: self.table_maps.load(Ordering::Relaxed),
            rows_enqueued: self.rows_enqueued.load(Ordering::Relaxed),
            rows_applied: self.rows_applied.load(Ordering::Relaxed),
            rows_superseded: self.rows_superseded.load(Ordering::Relaxed),
            apply_failures: self.apply_failures.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            checkpoint_failures: self.checkpoint_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Counters snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStatsSnapshot {
    pub events_fetched: u64,
    pub events_ignored: u64,
    pub table_maps: u64,
    pub rows_enqueued: u64,
    pub rows_applied: u64,
    pub rows_superseded: u64,
    pub apply_failures: u64,
    pub decode_errors: u64,
    pub rotations: u64,
    pub checkpoint_failures: u64,
    pub reconnects: u64,
}
