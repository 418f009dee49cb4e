//! The tile pyramid store.
//!
//! A [`TilePyramid`] partitions an unbounded 1-D coordinate space into a
//! level-of-detail hierarchy of fixed-size tiles grouped into blocks, and
//! lazily materializes both as consumers query ranges. It owns no transport
//! and no rendering resources: payload production is delegated to a
//! [`PayloadProvider`], fetch concurrency to a shared
//! [`RequestScheduler`](crate::scheduler::RequestScheduler).
//!
//! # Resolution
//!
//! A query carries a continuous sampling density (samples per pixel). The
//! store takes `floor(log2(density))` and lets the provider's
//! [`map_lod_level`](PayloadProvider::map_lod_level) snap that onto the
//! levels the data type actually serves. Range bounds are floored/ceiled
//! into LOD space: greedy overscan that may materialize one extra tile per
//! edge but guarantees seamless coverage of the visible range, which tile
//! edge rendering relies on.
//!
//! # Growth
//!
//! The pyramid only ever grows; eviction is deliberately out of scope. Tiles
//! stamp their block's last-used timestamp for an external usage-tracking
//! collaborator, and the store itself never reads it.

mod block;
mod config;
mod provider;

pub use block::TileBlock;
pub use config::{ConfigError, PyramidConfig};
pub use provider::{PayloadError, PayloadFetch, PayloadProvider};

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::scheduler::{RequestKey, RequestScheduler};
use crate::telemetry::PyramidMetrics;
use crate::tile::{Tile, TilePhase};

/// Levels above this would overflow the `u64` coordinate arithmetic; density
/// mappings are clamped here.
const MAX_LOD_LEVEL: u32 = 48;

type BlockMap<P, B> = HashMap<u64, Arc<TileBlock<P, B>>>;

/// Owns every LOD level of one logical data source.
///
/// Cheap to share as `Arc<TilePyramid<_>>`; all methods take `&self`.
/// Consumers of the same source should share one instance through a
/// [`PyramidRegistry`](crate::registry::PyramidRegistry) so they observe one
/// set of tiles and one in-flight request set.
pub struct TilePyramid<D: PayloadProvider> {
    label: String,
    config: PyramidConfig,
    provider: Arc<D>,
    scheduler: Arc<RequestScheduler>,
    levels: Mutex<HashMap<u32, BlockMap<D::Payload, D::BlockPayload>>>,
    metrics: Arc<PyramidMetrics>,
}

impl<D: PayloadProvider> TilePyramid<D> {
    /// Creates a store for one logical source.
    ///
    /// # Arguments
    ///
    /// * `label` - Names the store in logs and namespaces its request keys;
    ///   conventionally the source key, e.g. `"signal:coverage.bw"`
    /// * `config` - Pyramid geometry, validated here
    /// * `provider` - The data type driving payload production
    /// * `scheduler` - Fetch scheduler, possibly shared with other stores
    pub fn new(
        label: impl Into<String>,
        config: PyramidConfig,
        provider: Arc<D>,
        scheduler: Arc<RequestScheduler>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            label: label.into(),
            config,
            provider,
            scheduler,
            levels: Mutex::new(HashMap::new()),
            metrics: Arc::new(PyramidMetrics::new()),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn config(&self) -> PyramidConfig {
        self.config
    }

    pub fn metrics(&self) -> &Arc<PyramidMetrics> {
        &self.metrics
    }

    /// Visits every tile covering `[x0, x1]` at the level mapped from
    /// `sampling_density`.
    ///
    /// Bounds are clamped to `[0, maximum_x]`; a non-positive clamped span
    /// visits nothing. Missing blocks are created (eagerly creating their
    /// tiles), and when `request_data` is set, every `Empty` tile in range
    /// begins loading. `visit` runs for every covering tile regardless of
    /// state; skipping non-`Complete` tiles is the consumer's call.
    pub fn get_tiles<F>(&self, x0: f64, x1: f64, sampling_density: f64, request_data: bool, mut visit: F)
    where
        F: FnMut(&Arc<Tile<D::Payload>>),
    {
        let x0 = x0.clamp(0.0, self.config.maximum_x);
        let x1 = x1.clamp(0.0, self.config.maximum_x);
        if x1 <= x0 {
            return;
        }

        let level = self.resolve_level(sampling_density);
        let scale = (1u64 << level) as f64;
        let lod_x0 = (x0 / scale).floor() as u64;
        // Ceil: greedy overscan, full coverage over exact bounds.
        let lod_x1 = (x1 / scale).ceil() as u64;

        let tile_width = self.config.tile_width as u64;
        let first_row = lod_x0 / tile_width;
        let row_end = lod_x1.div_ceil(tile_width);

        for row in first_row..row_end {
            let tile = self.tile_at_row(level, row);
            if request_data && tile.phase() == TilePhase::Empty {
                self.begin_load(&tile);
            }
            visit(&tile);
        }
    }

    /// Point variant of [`get_tiles`](Self::get_tiles): the single tile
    /// containing `x` (clamped to the coordinate space).
    pub fn get_tile(&self, x: f64, sampling_density: f64, request_data: bool) -> Arc<Tile<D::Payload>> {
        let x = x.clamp(0.0, self.config.maximum_x);
        let level = self.resolve_level(sampling_density);
        let scale = (1u64 << level) as f64;
        let lod_x = (x / scale).floor() as u64;

        let tile = self.tile_at_row(level, lod_x / self.config.tile_width as u64);
        if request_data && tile.phase() == TilePhase::Empty {
            self.begin_load(&tile);
        }
        tile
    }

    /// Whether the level mapped from `sampling_density` has ever had a block
    /// created.
    ///
    /// This reflects query history, not source capability: a level no query
    /// has touched yet reports `false` even if the source could serve it.
    /// Callers distinguishing "not yet loaded" from "structurally absent"
    /// must tolerate such false negatives.
    pub fn is_within_initialized_lod_range(&self, sampling_density: f64) -> bool {
        let level = self.resolve_level(sampling_density);
        self.levels
            .lock()
            .get(&level)
            .is_some_and(|blocks| !blocks.is_empty())
    }

    /// Returns the shared resource of the tile's block, allocating it via
    /// the provider on first demand.
    ///
    /// Returns `None` when the tile no longer belongs to this store (it was
    /// orphaned by [`clear`](Self::clear)): an orphaned tile must never
    /// alias a resource of the rebuilt pyramid.
    pub fn get_block_payload(&self, tile: &Arc<Tile<D::Payload>>) -> Option<D::BlockPayload> {
        let row = tile.lod_x() / self.config.tile_width as u64;
        let block_index = row / self.config.tiles_per_block as u64;
        let block = {
            let levels = self.levels.lock();
            Arc::clone(levels.get(&tile.level())?.get(&block_index)?)
        };

        let row_in_block = (row % self.config.tiles_per_block as u64) as u32;
        if !Arc::ptr_eq(block.tile(row_in_block), tile) {
            warn!(store = %self.label, tile = %tile.key(), "Ignoring block payload request for an orphaned tile");
            return None;
        }

        Some(block.payload_or_create(|| {
            self.metrics.block_payload_created();
            debug!(store = %self.label, level = block.level(), block = block.block_index(), "Allocating block payload");
            self.provider.create_block_payload(
                block.level(),
                block.start_lod_x(),
                self.config.tile_width,
                self.config.tiles_per_block,
            )
        }))
    }

    /// Discards every level, block and tile, releasing all allocated block
    /// resources through the provider.
    ///
    /// Used when the underlying source identity changes. Fetches already in
    /// flight settle against their now-orphaned tiles; nothing they do can
    /// reach the store's fresh state.
    pub fn clear(&self) {
        let levels = std::mem::take(&mut *self.levels.lock());
        let mut released = 0u64;
        for blocks in levels.into_values() {
            for block in blocks.into_values() {
                if let Some(payload) = block.take_payload() {
                    self.metrics.block_payload_released();
                    self.provider.release_block_payload(payload);
                    released += 1;
                }
            }
        }
        self.metrics.store_cleared();
        debug!(store = %self.label, released, "Cleared tile pyramid");
    }

    /// Request key used for this tile with the shared scheduler; lets
    /// consumers re-prioritize or withdraw pending fetches.
    pub fn request_key(&self, tile: &Tile<D::Payload>) -> RequestKey {
        RequestKey::new(&self.label, tile.key())
    }

    fn resolve_level(&self, sampling_density: f64) -> u32 {
        let density_level = sampling_density.max(1.0).log2().floor() as u32;
        self.provider.map_lod_level(density_level).min(MAX_LOD_LEVEL)
    }

    /// Finds or creates the block containing `row`, returning that row's
    /// tile. Tiles of a new block are created eagerly; the block payload is
    /// not.
    fn tile_at_row(&self, level: u32, row: u64) -> Arc<Tile<D::Payload>> {
        let tiles_per_block = self.config.tiles_per_block as u64;
        let block_index = row / tiles_per_block;

        let block = {
            let mut levels = self.levels.lock();
            let blocks = levels.entry(level).or_default();
            Arc::clone(blocks.entry(block_index).or_insert_with(|| {
                self.metrics.block_created(tiles_per_block);
                debug!(store = %self.label, level, block = block_index, "Creating block");
                Arc::new(TileBlock::new(
                    level,
                    block_index,
                    self.config.tile_width,
                    self.config.tiles_per_block,
                ))
            }))
        };

        Arc::clone(block.tile((row % tiles_per_block) as u32))
    }

    /// Hands one tile's fetch to the scheduler.
    ///
    /// The scheduled closure re-checks the tile state when it actually
    /// starts, so a fetch that became stale in the queue is a no-op.
    fn begin_load(&self, tile: &Arc<Tile<D::Payload>>) {
        let key = self.request_key(tile);
        self.metrics.load_requested();

        let provider = Arc::clone(&self.provider);
        let metrics = Arc::clone(&self.metrics);
        let label = self.label.clone();
        let tile = Arc::clone(tile);

        self.scheduler.load(
            key,
            Box::new(move || -> BoxFuture<'static, ()> {
                if !tile.set_loading() {
                    return Box::pin(futures::future::ready(()));
                }
                match provider.request_payload(tile.descriptor()) {
                    PayloadFetch::Ready(payload) => {
                        tile.complete_with(payload);
                        metrics.load_completed();
                        Box::pin(futures::future::ready(()))
                    }
                    PayloadFetch::Pending(fetch) => Box::pin(async move {
                        match fetch.await {
                            Ok(payload) => {
                                tile.complete_with(payload);
                                metrics.load_completed();
                            }
                            Err(e) => {
                                warn!(store = %label, tile = %tile.key(), error = %e, "Tile payload fetch failed");
                                metrics.load_failed();
                                tile.fail_with(&e.to_string());
                            }
                        }
                    }),
                }
            }),
        );
    }
}

impl<D: PayloadProvider> std::fmt::Debug for TilePyramid<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let levels = self.levels.lock();
        let blocks: usize = levels.values().map(|b| b.len()).sum();
        f.debug_struct("TilePyramid")
            .field("label", &self.label)
            .field("levels", &levels.len())
            .field("blocks", &blocks)
            .finish()
    }
}
