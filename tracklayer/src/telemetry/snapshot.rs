//! Point-in-time copies of the telemetry counters.

use std::fmt;

/// Snapshot of [`PyramidMetrics`](super::PyramidMetrics).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PyramidSnapshot {
    pub blocks_created: u64,
    pub tiles_created: u64,
    pub block_payloads_created: u64,
    pub block_payloads_released: u64,
    pub loads_requested: u64,
    pub loads_completed: u64,
    pub loads_failed: u64,
    pub clears: u64,
}

impl PyramidSnapshot {
    /// Loads that have been requested but have not settled yet.
    pub fn loads_in_flight(&self) -> u64 {
        self.loads_requested
            .saturating_sub(self.loads_completed + self.loads_failed)
    }
}

impl fmt::Display for PyramidSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pyramid: {} blocks, {} tiles, loads {}/{} ok, {} failed",
            self.blocks_created,
            self.tiles_created,
            self.loads_completed,
            self.loads_requested,
            self.loads_failed
        )
    }
}

/// Snapshot of [`SchedulerMetrics`](super::SchedulerMetrics).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerSnapshot {
    pub queued: u64,
    pub replaced: u64,
    pub removed: u64,
    pub started: u64,
    pub settled: u64,
    pub max_active_seen: u64,
}

impl fmt::Display for SchedulerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scheduler: {} queued, {} started, {} settled, peak {} active",
            self.queued, self.started, self.settled, self.max_active_seen
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loads_in_flight() {
        let snapshot = PyramidSnapshot {
            loads_requested: 10,
            loads_completed: 6,
            loads_failed: 1,
            ..Default::default()
        };
        assert_eq!(snapshot.loads_in_flight(), 3);
    }

    #[test]
    fn test_snapshot_display() {
        let snapshot = SchedulerSnapshot {
            queued: 4,
            started: 3,
            settled: 2,
            max_active_seen: 2,
            ..Default::default()
        };
        let text = format!("{}", snapshot);
        assert!(text.contains("4 queued"));
        assert!(text.contains("peak 2 active"));
    }
}
