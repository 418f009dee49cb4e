//! Cache telemetry for observability and user feedback.
//!
//! Lock-free atomic counters instrumented from the pyramid store and the
//! request scheduler, with point-in-time snapshots for display layers.
//!
//! ```text
//! TilePyramid ──────► PyramidMetrics ───► PyramidSnapshot ───► Views
//! RequestScheduler ─► SchedulerMetrics ─► SchedulerSnapshot    (UI, logs)
//! ```
//!
//! Counters only ever increase; rates and deltas are a consumer concern.

mod metrics;
mod snapshot;

pub use metrics::{PyramidMetrics, SchedulerMetrics};
pub use snapshot::{PyramidSnapshot, SchedulerSnapshot};
