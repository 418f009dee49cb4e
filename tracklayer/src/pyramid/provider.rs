//! Extension seam a concrete track data type plugs into the pyramid.

use futures::future::BoxFuture;
use thiserror::Error;

use crate::source::SourceError;
use crate::tile::TileDescriptor;

/// A payload fetch failure, surfaced to the owning tile as a `load-failed`
/// event and never beyond it.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The underlying data source failed.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Provider-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Result of asking a provider for a tile's payload.
///
/// The two variants are explicit on purpose: a provider states whether the
/// payload is already at hand or still being produced, and the store never
/// has to sniff what it was given.
pub enum PayloadFetch<P> {
    /// Payload available immediately (e.g. computed from data already in
    /// memory). The tile completes synchronously.
    Ready(P),
    /// Payload is being produced; the tile completes or fails when the
    /// future settles.
    Pending(BoxFuture<'static, Result<P, PayloadError>>),
}

impl<P> std::fmt::Debug for PayloadFetch<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadFetch::Ready(_) => f.write_str("PayloadFetch::Ready"),
            PayloadFetch::Pending(_) => f.write_str("PayloadFetch::Pending"),
        }
    }
}

/// What a concrete track data type supplies to drive a [`TilePyramid`].
///
/// [`TilePyramid`]: super::TilePyramid
pub trait PayloadProvider: Send + Sync + 'static {
    /// Per-tile data produced by [`request_payload`](Self::request_payload).
    type Payload: Clone + Send + Sync + 'static;

    /// Shared per-block resource (a packed buffer, a texture handle, or `()`
    /// when the data type needs none). Handles are cloned out to consumers,
    /// so they should be cheap to clone.
    type BlockPayload: Clone + Send + Sync + 'static;

    /// Restricts conceptual LOD levels to the subset this data type serves.
    ///
    /// The store computes `floor(log2(sampling_density))` and passes it
    /// here; the returned level is the one actually materialized. The
    /// default is the identity. A base-pair-exact sequence type would pin
    /// every input to 0; a zoom-summary signal type snaps to the nearest
    /// pre-aggregated level.
    fn map_lod_level(&self, level: u32) -> u32 {
        level
    }

    /// Produces the payload for one tile.
    fn request_payload(&self, tile: TileDescriptor) -> PayloadFetch<Self::Payload>;

    /// Allocates the shared resource for a block. Called lazily, at most
    /// once per block, on first demand.
    ///
    /// # Arguments
    ///
    /// * `level` - LOD level of the block
    /// * `block_lod_x` - Offset of the block's left edge in LOD-space units
    /// * `tile_width` - Tile width in LOD-space units
    /// * `tiles_per_block` - Number of rows in the block
    fn create_block_payload(
        &self,
        level: u32,
        block_lod_x: u64,
        tile_width: u32,
        tiles_per_block: u32,
    ) -> Self::BlockPayload;

    /// Releases a block resource during [`TilePyramid::clear`].
    ///
    /// [`TilePyramid::clear`]: super::TilePyramid::clear
    fn release_block_payload(&self, _payload: Self::BlockPayload) {}
}
