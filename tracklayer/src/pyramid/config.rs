//! Pyramid construction parameters.

use thiserror::Error;

/// Rejected construction parameters.
///
/// These are programming errors, not runtime conditions: a store cannot
/// operate with a degenerate geometry, so construction fails fast.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("tile_width must be at least 1")]
    ZeroTileWidth,

    #[error("tiles_per_block must be at least 1")]
    ZeroTilesPerBlock,

    #[error("maximum_x must be a non-negative number, got {0}")]
    InvalidMaximumX(f64),
}

/// Geometry of a tile pyramid, fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct PyramidConfig {
    /// Width of one tile in LOD-space units.
    pub tile_width: u32,
    /// Number of sibling tiles grouped into one block.
    pub tiles_per_block: u32,
    /// Upper bound of the absolute coordinate space; queries are clamped to
    /// `[0, maximum_x]`.
    pub maximum_x: f64,
}

impl Default for PyramidConfig {
    fn default() -> Self {
        Self {
            tile_width: 1024,
            tiles_per_block: 8,
            maximum_x: f64::MAX,
        }
    }
}

impl PyramidConfig {
    /// Width of one block in LOD-space units.
    pub fn block_size(&self) -> u64 {
        self.tile_width as u64 * self.tiles_per_block as u64
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.tile_width == 0 {
            return Err(ConfigError::ZeroTileWidth);
        }
        if self.tiles_per_block == 0 {
            return Err(ConfigError::ZeroTilesPerBlock);
        }
        if self.maximum_x.is_nan() || self.maximum_x < 0.0 {
            return Err(ConfigError::InvalidMaximumX(self.maximum_x));
        }
        Ok(())
    }
}
