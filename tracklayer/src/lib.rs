//! TrackLayer - On-demand tile caching for genomic track rendering
//!
//! This library provides the tile pyramid cache behind an interactive
//! genome browser: it partitions an unbounded 1-D coordinate space into a
//! level-of-detail hierarchy of fixed-size tiles grouped into blocks,
//! lazily fetches tile payloads from external data sources, bounds and
//! prioritizes concurrent fetches under panning/zooming churn, and snaps
//! continuous sampling densities onto the resolutions a pre-aggregated
//! source actually carries.
//!
//! GPU resources, UI composition, input handling and file-format parsing
//! are collaborators behind narrow traits, not residents of this crate.
//!
//! # Overview
//!
//! - [`pyramid::TilePyramid`] owns the LOD hierarchy for one logical
//!   source and drives payload loading through a [`pyramid::PayloadProvider`].
//! - [`scheduler::RequestScheduler`] caps in-flight fetches and serves the
//!   most recently requested tiles first.
//! - [`registry::PyramidRegistry`] lets every consumer of the same source
//!   share one pyramid instance.
//! - [`signal`] adapts zoom-summary signal sources (via the
//!   [`source::RangeSource`] contract) into tile payloads.
//! - [`telemetry`] exposes counters for all of the above.

pub mod pyramid;
pub mod registry;
pub mod scheduler;
pub mod signal;
pub mod source;
pub mod telemetry;
pub mod tile;

pub use pyramid::{ConfigError, PayloadError, PayloadFetch, PayloadProvider, PyramidConfig, TilePyramid};
pub use registry::PyramidRegistry;
pub use scheduler::{RequestKey, RequestScheduler, SchedulerConfig};
pub use tile::{ObserverId, Tile, TileDescriptor, TileObserver, TilePhase};
