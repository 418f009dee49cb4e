//! Blocks: fixed-size groups of sibling tiles sharing one lazy resource.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::tile::{Tile, UsageStamp};

/// A group of `tiles_per_block` adjacent tiles at one LOD level.
///
/// Tiles are created eagerly with the block (they are small) while the
/// shared block payload (the expensive part, e.g. one packed buffer for the
/// whole block) is allocated only on first demand.
pub struct TileBlock<P, B> {
    level: u32,
    block_index: u64,
    start_lod_x: u64,
    tiles: Vec<Arc<Tile<P>>>,
    payload: Mutex<Option<B>>,
    usage: Arc<UsageStamp>,
}

impl<P, B> TileBlock<P, B> {
    pub(crate) fn new(level: u32, block_index: u64, tile_width: u32, tiles_per_block: u32) -> Self {
        let block_size = tile_width as u64 * tiles_per_block as u64;
        let start_lod_x = block_index * block_size;
        let usage = Arc::new(UsageStamp::new());
        let tiles = (0..tiles_per_block)
            .map(|row| {
                let lod_x = start_lod_x + row as u64 * tile_width as u64;
                Tile::new(level, lod_x, tile_width, row, Arc::clone(&usage))
            })
            .collect();
        Self {
            level,
            block_index,
            start_lod_x,
            tiles,
            payload: Mutex::new(None),
            usage,
        }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn block_index(&self) -> u64 {
        self.block_index
    }

    /// LOD-space offset of the block's left edge.
    pub fn start_lod_x(&self) -> u64 {
        self.start_lod_x
    }

    /// The tile at a row within this block.
    ///
    /// # Panics
    ///
    /// Panics if `row >= tiles_per_block`; rows always come from coordinate
    /// math that has already been reduced modulo the block size.
    pub fn tile(&self, row: u32) -> &Arc<Tile<P>> {
        &self.tiles[row as usize]
    }

    /// All rows, in order.
    pub fn tiles(&self) -> &[Arc<Tile<P>>] {
        &self.tiles
    }

    /// Shared last-used stamp written by the block's tiles.
    pub fn usage(&self) -> &Arc<UsageStamp> {
        &self.usage
    }

    /// Whether the shared resource has been allocated yet.
    pub fn has_payload(&self) -> bool {
        self.payload.lock().is_some()
    }

    pub(crate) fn take_payload(&self) -> Option<B> {
        self.payload.lock().take()
    }
}

impl<P, B: Clone> TileBlock<P, B> {
    /// Returns the shared resource, allocating it through `create` on first
    /// demand.
    pub(crate) fn payload_or_create(&self, create: impl FnOnce() -> B) -> B {
        let mut payload = self.payload.lock();
        payload.get_or_insert_with(create).clone()
    }
}
