//! Signal tracks over zoom-summary sources.
//!
//! This module bridges the generic pyramid to range-aggregated signal data
//! (coverage, conservation scores, methylation levels...). It owns three
//! concerns:
//!
//! - **LOD assignment** ([`LodMapping`]): snapping the pyramid's conceptual
//!   levels onto the sparse set of resolutions a source pre-aggregates.
//! - **Rasterization** ([`rasterize_records`]): turning fetched records into
//!   per-cell values in a packed, multi-channel buffer.
//! - **Payload production** ([`SignalProvider`]): a complete
//!   [`PayloadProvider`] wiring both into a [`TilePyramid`].
//!
//! [`TilePyramid`]: crate::pyramid::TilePyramid

mod lod_map;
mod raster;

pub use lod_map::{LodMapping, LOD_TOLERANCE};
pub use raster::{rasterize_records, RasterSummary};

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::pyramid::{PayloadFetch, PayloadProvider};
use crate::source::{natural_cmp, LodSelector, RangeInfo, RangeSource, SourceError};
use crate::tile::TileDescriptor;

/// Hook receiving the kind string of each unrecognized record.
pub type UnknownRecordHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Translates pyramid tiles into record fetches against one source.
pub struct SignalAdapter<S: RangeSource> {
    source: Arc<S>,
    mapping: LodMapping,
    unknown_hook: Option<UnknownRecordHook>,
}

impl<S: RangeSource> SignalAdapter<S> {
    /// Builds the adapter, deriving the LOD tables from the source's
    /// zoom-summary table.
    pub fn new(source: Arc<S>) -> Self {
        let mapping = LodMapping::build(source.zoom_levels());
        Self {
            source,
            mapping,
            unknown_hook: None,
        }
    }

    /// Installs a hook for unrecognized records. Without one they are still
    /// skipped and counted, just not reported.
    pub fn with_unknown_record_hook(mut self, hook: UnknownRecordHook) -> Self {
        self.unknown_hook = Some(hook);
        self
    }

    pub fn mapping(&self) -> &LodMapping {
        &self.mapping
    }

    /// The source's coordinate ranges in natural order (`chr2` before
    /// `chr10`), each starting at 0 and spanning its full length.
    pub async fn contigs(&self) -> Result<Vec<RangeInfo>, SourceError> {
        let mut ranges = self.source.list_ranges().await?;
        ranges.sort_by(|a, b| natural_cmp(&a.id, &b.id));
        Ok(ranges)
    }

    /// Fetches the records covering one tile and rasterizes them into
    /// `channel` of the interleaved `target` buffer.
    ///
    /// Aggregated tiers are used when the tile's level has one assigned;
    /// otherwise raw records are fetched and written exactly.
    pub async fn read_tile_into(
        &self,
        range_id: &str,
        tile: TileDescriptor,
        target: &mut [f32],
        channel_count: usize,
        channel: usize,
    ) -> Result<RasterSummary, SourceError> {
        let selector = match self.mapping.zoom_index(tile.level) {
            Some(index) => LodSelector::Zoom(index),
            None => LodSelector::Raw,
        };
        let records = self
            .source
            .fetch_records(range_id, tile.x, tile.x + tile.span, selector)
            .await?;

        let hook = self.unknown_hook.clone();
        let summary = rasterize_records(
            &records,
            tile.level,
            tile.x,
            tile.tile_width as usize,
            target,
            channel_count,
            channel,
            |kind| {
                if let Some(hook) = &hook {
                    hook(kind);
                }
            },
        );
        if summary.unknown_records > 0 {
            debug!(
                range = range_id,
                tile = ?(tile.level, tile.lod_x),
                skipped = summary.unknown_records,
                "Skipped unrecognized records"
            );
        }
        Ok(summary)
    }
}

/// One source feeding one channel of a signal track.
pub struct SignalChannel<S: RangeSource> {
    pub adapter: Arc<SignalAdapter<S>>,
    pub range_id: String,
}

impl<S: RangeSource> Clone for SignalChannel<S> {
    fn clone(&self) -> Self {
        Self {
            adapter: Arc::clone(&self.adapter),
            range_id: self.range_id.clone(),
        }
    }
}

/// Per-tile payload: `tile_width` cells interleaved across every channel.
#[derive(Debug, Clone)]
pub struct SignalTilePayload {
    values: Arc<Vec<f32>>,
    channel_count: usize,
}

impl SignalTilePayload {
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Number of cells per channel.
    pub fn cells(&self) -> usize {
        self.values.len() / self.channel_count
    }

    pub fn value(&self, cell: usize, channel: usize) -> f32 {
        self.values[cell * self.channel_count + channel]
    }

    /// The raw interleaved buffer.
    pub fn values(&self) -> &[f32] {
        &self.values
    }
}

/// Per-block resource: one packed buffer holding every row of the block,
/// interleaved the same way as the tile payloads.
#[derive(Clone)]
pub struct SignalBlockBuffer {
    values: Arc<RwLock<Vec<f32>>>,
    row_stride: usize,
}

impl SignalBlockBuffer {
    fn new(tile_width: usize, channel_count: usize, rows: usize) -> Self {
        let row_stride = tile_width * channel_count;
        Self {
            values: Arc::new(RwLock::new(vec![0.0; row_stride * rows])),
            row_stride,
        }
    }

    /// Values of one interleaved row.
    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    /// Copies a tile payload into its row of the packed buffer.
    pub fn write_row(&self, row: usize, payload: &SignalTilePayload) {
        let mut values = self.values.write();
        let start = row * self.row_stride;
        values[start..start + self.row_stride].copy_from_slice(payload.values());
    }

    /// Reads one row back out.
    pub fn read_row(&self, row: usize) -> Vec<f32> {
        let values = self.values.read();
        let start = row * self.row_stride;
        values[start..start + self.row_stride].to_vec()
    }
}

/// [`PayloadProvider`] for signal tracks.
///
/// Each channel is an independent `(adapter, range)` pair; a fetch fills
/// every channel of one interleaved buffer, so a two-source comparison
/// track costs one tile payload, not two.
///
/// Level selection follows the first channel's LOD mapping; sources grouped
/// into one provider are expected to carry compatible zoom tables.
pub struct SignalProvider<S: RangeSource> {
    channels: Vec<SignalChannel<S>>,
}

impl<S: RangeSource> SignalProvider<S> {
    /// # Panics
    ///
    /// Panics on an empty channel list; a provider with nothing to fetch
    /// is a programming error.
    pub fn new(channels: Vec<SignalChannel<S>>) -> Self {
        assert!(!channels.is_empty(), "SignalProvider needs at least one channel");
        Self { channels }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl<S: RangeSource + 'static> PayloadProvider for SignalProvider<S> {
    type Payload = SignalTilePayload;
    type BlockPayload = SignalBlockBuffer;

    fn map_lod_level(&self, level: u32) -> u32 {
        self.channels[0].adapter.mapping().mapped_lod(level)
    }

    fn request_payload(&self, tile: TileDescriptor) -> PayloadFetch<SignalTilePayload> {
        let channels = self.channels.clone();
        PayloadFetch::Pending(Box::pin(async move {
            let channel_count = channels.len();
            let mut values = vec![0.0f32; tile.tile_width as usize * channel_count];
            for (channel, c) in channels.iter().enumerate() {
                c.adapter
                    .read_tile_into(&c.range_id, tile, &mut values, channel_count, channel)
                    .await?;
            }
            Ok(SignalTilePayload {
                values: Arc::new(values),
                channel_count,
            })
        }))
    }

    fn create_block_payload(
        &self,
        _level: u32,
        _block_lod_x: u64,
        tile_width: u32,
        tiles_per_block: u32,
    ) -> SignalBlockBuffer {
        SignalBlockBuffer::new(
            tile_width as usize,
            self.channels.len(),
            tiles_per_block as usize,
        )
    }
}
