//! Atomic counter sinks.

use std::sync::atomic::{AtomicU64, Ordering};

use super::snapshot::{PyramidSnapshot, SchedulerSnapshot};

/// Counters instrumented from a tile pyramid store.
///
/// All methods are lock-free and safe to call from fetch tasks.
#[derive(Debug, Default)]
pub struct PyramidMetrics {
    blocks_created: AtomicU64,
    tiles_created: AtomicU64,
    block_payloads_created: AtomicU64,
    block_payloads_released: AtomicU64,
    loads_requested: AtomicU64,
    loads_completed: AtomicU64,
    loads_failed: AtomicU64,
    clears: AtomicU64,
}

impl PyramidMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a block creation and its eagerly created tiles.
    pub fn block_created(&self, tiles: u64) {
        self.blocks_created.fetch_add(1, Ordering::Relaxed);
        self.tiles_created.fetch_add(tiles, Ordering::Relaxed);
    }

    pub fn block_payload_created(&self) {
        self.block_payloads_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn block_payload_released(&self) {
        self.block_payloads_released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn load_requested(&self) {
        self.loads_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn load_completed(&self) {
        self.loads_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn load_failed(&self) {
        self.loads_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn store_cleared(&self) {
        self.clears.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a point-in-time copy of every counter.
    pub fn snapshot(&self) -> PyramidSnapshot {
        PyramidSnapshot {
            blocks_created: self.blocks_created.load(Ordering::Relaxed),
            tiles_created: self.tiles_created.load(Ordering::Relaxed),
            block_payloads_created: self.block_payloads_created.load(Ordering::Relaxed),
            block_payloads_released: self.block_payloads_released.load(Ordering::Relaxed),
            loads_requested: self.loads_requested.load(Ordering::Relaxed),
            loads_completed: self.loads_completed.load(Ordering::Relaxed),
            loads_failed: self.loads_failed.load(Ordering::Relaxed),
            clears: self.clears.load(Ordering::Relaxed),
        }
    }
}

/// Counters instrumented from a request scheduler.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    queued: AtomicU64,
    replaced: AtomicU64,
    removed: AtomicU64,
    started: AtomicU64,
    settled: AtomicU64,
    max_active_seen: AtomicU64,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    /// A pending entry was superseded by a fresh submission for the same key.
    pub fn request_replaced(&self) {
        self.replaced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_removed(&self) {
        self.removed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a start and updates the concurrency high-water mark.
    pub fn request_started(&self, active_now: usize) {
        self.started.fetch_add(1, Ordering::Relaxed);
        self.max_active_seen
            .fetch_max(active_now as u64, Ordering::Relaxed);
    }

    pub fn request_settled(&self) {
        self.settled.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a point-in-time copy of every counter.
    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            replaced: self.replaced.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            started: self.started.load(Ordering::Relaxed),
            settled: self.settled.load(Ordering::Relaxed),
            max_active_seen: self.max_active_seen.load(Ordering::Relaxed),
        }
    }
}
