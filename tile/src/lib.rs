//! A MegaSD tile image decoder and encoder.
//!
//! The format is defined as 64 by 40 pixels exactly, split into forty 8 by 8
//! tiles. Up to three 16-color palettes can be defined and each tile uses
//! exactly one of them.
//!
//! The file is written as 1280 bytes of pixel information (a 4-bit index per
//! pixel), followed by 40 bytes of palette index, one per tile, and finally
//! up to three 32-byte palettes of 16 colors where each color is stored as a
//! packed 16-bit value. There is no compression, so the resulting file is
//! either 1352, 1384 or 1416 bytes depending on the number of palettes used.

mod decoder;
mod encoder;
mod errors;
mod indexed;
mod quantize;

pub use crate::decoder::{decode, decode_config, TileConfig};
pub use crate::encoder::encode;
pub use crate::errors::TileError;
pub use crate::indexed::IndexedImage;

pub(crate) const TILE_WIDTH: usize = 8;
pub(crate) const TILE_HEIGHT: usize = TILE_WIDTH;
pub(crate) const TILES_X: usize = 8;
pub(crate) const TILES_Y: usize = 5;
pub(crate) const NUM_TILES: usize = TILES_X * TILES_Y;
pub(crate) const COLORS_PER_PALETTE: usize = 16;
pub(crate) const MAX_PALETTES: usize = 3;

/// Width of every tile image in pixels.
pub const PIXEL_WIDTH: usize = TILE_WIDTH * TILES_X;
/// Height of every tile image in pixels.
pub const PIXEL_HEIGHT: usize = TILE_HEIGHT * TILES_Y;

pub(crate) const NUM_PIXELS: usize = PIXEL_WIDTH * PIXEL_HEIGHT;
pub(crate) const PIXEL_BYTES: usize = NUM_PIXELS / 2;
