use std::collections::HashSet;
use std::io::Write;

use image::{Rgba, RgbaImage};

use crate::quantize;
use crate::{
    TileError, COLORS_PER_PALETTE, MAX_PALETTES, NUM_PIXELS, NUM_TILES, PIXEL_BYTES,
    PIXEL_HEIGHT, PIXEL_WIDTH, TILES_X, TILES_Y, TILE_HEIGHT, TILE_WIDTH,
};

/// Writes the 64x40 image `img` to `w` in MegaSD tile format.
///
/// Images with at most 16 distinct colors are stored directly with a single
/// sub-palette. Anything else is quantized down to at most 48 colors, every
/// tile is reduced to at most 16 colors by merging its closest pairs, and
/// the per-tile palettes are bin-packed into at most three sub-palettes.
/// When the packing fails the quantization target shrinks by one and the
/// whole attempt repeats, down to a 16-color floor.
pub fn encode<W: Write>(w: &mut W, img: &RgbaImage) -> Result<(), TileError> {
    if img.width() as usize != PIXEL_WIDTH || img.height() as usize != PIXEL_HEIGHT {
        return Err(TileError::WrongSize);
    }

    let distinct = distinct_colors(img);

    if distinct.len() <= COLORS_PER_PALETTE {
        // Every tile trivially fits the one sub-palette; the tile selector
        // bytes all stay zero.
        let pixels = index_exact(img, &distinct);
        let mut palette = distinct;
        pad_palette(&mut palette);
        return write_stream(w, &pixels, &[0u8; NUM_TILES], &palette);
    }

    let max = distinct.len().min(COLORS_PER_PALETTE * MAX_PALETTES);
    for target in (COLORS_PER_PALETTE..=max).rev() {
        let palette = quantize::median_cut(img, target);
        let mut working = Working::remap(img, &palette);
        if let Some((bins, tiles)) = working.reduce_and_pack() {
            let (palette, pixels) = finalize(&working, &bins, &tiles);
            return write_stream(w, &pixels, &tiles, &palette);
        }
    }

    Err(TileError::Unpackable)
}

/// The image being reworked: row-major ids into a small palette, plus the
/// frequency each color had when the palette was applied. Merged-away colors
/// keep a zero count.
struct Working {
    pixels: Vec<u8>,
    palette: Vec<Rgba<u8>>,
    counts: Vec<u32>,
}

/// The colors used by one or more tiles, in first-seen order.
#[derive(Clone)]
struct TilePalette {
    colors: Vec<u8>,
    tiles: Vec<u8>,
}

impl Working {
    /// Renders `img` through `palette`, mapping every pixel to its nearest
    /// entry.
    fn remap(img: &RgbaImage, palette: &[Rgba<u8>]) -> Self {
        let mut pixels = Vec::with_capacity(NUM_PIXELS);
        let mut counts = vec![0u32; palette.len()];
        for px in img.pixels() {
            let id = nearest(palette, *px) as u8;
            counts[usize::from(id)] += 1;
            pixels.push(id);
        }
        Working {
            pixels,
            palette: palette.to_vec(),
            counts,
        }
    }

    fn pixel(&self, x: usize, y: usize) -> u8 {
        self.pixels[y * PIXEL_WIDTH + x]
    }

    /// Distinct colors of one tile, in row-major first-seen order.
    fn tile_colors(&self, tile: usize) -> Vec<u8> {
        let tx = tile % TILES_X;
        let ty = tile / TILES_X;
        let mut colors = Vec::new();
        for y in 0..TILE_HEIGHT {
            for x in 0..TILE_WIDTH {
                let id = self.pixel(tx * TILE_WIDTH + x, ty * TILE_HEIGHT + y);
                if !colors.contains(&id) {
                    colors.push(id);
                }
            }
        }
        colors
    }

    /// Reduces every tile to at most 16 colors, then packs the per-tile
    /// palettes into at most three bins. Returns the packed bins and the
    /// tile-to-bin table, or `None` when the packing does not fit.
    fn reduce_and_pack(&mut self) -> Option<(Vec<TilePalette>, [u8; NUM_TILES])> {
        for tile in 0..NUM_TILES {
            self.reduce_tile(tile);
        }

        let mut palettes: Vec<TilePalette> = (0..NUM_TILES)
            .map(|tile| TilePalette {
                colors: self.tile_colors(tile),
                tiles: vec![tile as u8],
            })
            .collect();

        // Biggest palettes first; the sort is stable so equal sizes keep
        // tile order, which keeps the output bytes reproducible.
        palettes.sort_by(|a, b| b.colors.len().cmp(&a.colors.len()));

        let packed = pack_palettes(&palettes, Vec::new())?;

        let mut tiles = [0u8; NUM_TILES];
        for (bin, palette) in packed.iter().enumerate() {
            for &tile in &palette.tiles {
                tiles[usize::from(tile)] = bin as u8;
            }
        }
        Some((packed, tiles))
    }

    /// Merges the closest pair of colors in a tile until it holds at most
    /// 16, always keeping the color that was more frequent across the whole
    /// image and rewriting every occurrence of the other.
    fn reduce_tile(&mut self, tile: usize) {
        let mut colors = self.tile_colors(tile);
        while colors.len() > COLORS_PER_PALETTE {
            let (a, b) = closest_pair(&self.palette, &colors);
            let (keep, drop) = if self.counts[usize::from(a)] > self.counts[usize::from(b)] {
                (a, b)
            } else {
                (b, a)
            };

            for px in &mut self.pixels {
                if *px == drop {
                    *px = keep;
                }
            }
            colors.retain(|&c| c != drop);
            self.counts[usize::from(drop)] = 0;
        }
    }
}

fn distinct_colors(img: &RgbaImage) -> Vec<Rgba<u8>> {
    let mut seen = HashSet::new();
    let mut colors = Vec::new();
    for px in img.pixels() {
        if seen.insert(*px) {
            colors.push(*px);
        }
    }
    colors
}

fn index_exact(img: &RgbaImage, palette: &[Rgba<u8>]) -> Vec<u8> {
    img.pixels()
        .map(|px| {
            palette
                .iter()
                .position(|c| c == px)
                .unwrap_or_default() as u8
        })
        .collect()
}

/// Index of the palette entry closest to `c` by the squared-RGBA metric;
/// earlier entries win ties.
fn nearest(palette: &[Rgba<u8>], c: Rgba<u8>) -> usize {
    let mut best = u32::MAX;
    let mut index = 0;
    for (i, &p) in palette.iter().enumerate() {
        let d = color_distance(p, c);
        if d < best {
            best = d;
            index = i;
        }
    }
    index
}

fn sq_diff(x: u32, y: u32) -> u32 {
    let d = x.wrapping_sub(y);
    d.wrapping_mul(d) >> 2
}

/// Squared distance over 16-bit-scaled RGBA channels, in wrapping 32-bit
/// arithmetic. Color identity is this concrete representation, never a
/// perceptual model.
fn color_distance(c1: Rgba<u8>, c2: Rgba<u8>) -> u32 {
    let scale = |v: u8| u32::from(v) * 0x101;
    sq_diff(scale(c1.0[0]), scale(c2.0[0]))
        .wrapping_add(sq_diff(scale(c1.0[1]), scale(c2.0[1])))
        .wrapping_add(sq_diff(scale(c1.0[2]), scale(c2.0[2])))
        .wrapping_add(sq_diff(scale(c1.0[3]), scale(c2.0[3])))
}

/// The two closest colors of `colors`; the first ordered pair reaching the
/// minimum wins.
fn closest_pair(palette: &[Rgba<u8>], colors: &[u8]) -> (u8, u8) {
    let mut best = u32::MAX;
    let mut pair = (colors[0], colors[0]);
    for (i, &c1) in colors.iter().enumerate() {
        for (j, &c2) in colors.iter().enumerate() {
            if i == j {
                continue;
            }
            let sum = color_distance(palette[usize::from(c1)], palette[usize::from(c2)]);
            if sum < best {
                best = sum;
                pair = (c1, c2);
            }
        }
    }
    pair
}

/// Colors of `want` that are missing from `have`.
fn palette_difference(have: &[u8], want: &[u8]) -> Vec<u8> {
    want.iter()
        .copied()
        .filter(|c| !have.contains(c))
        .collect()
}

/// Variation of the bin-packing problem: up to three bins, each with a
/// capacity of 16 colors. First Fit Decreasing over the size-sorted input,
/// with backtracking: a tile goes into the first open bin whose palette
/// already covers it or has room for its novel colors, and when the rest of
/// the input cannot be placed the next bin is tried instead. As a last
/// resort a new bin is opened; the final bin count decides success.
fn pack_palettes(input: &[TilePalette], mut out: Vec<TilePalette>) -> Option<Vec<TilePalette>> {
    let Some((first, rest)) = input.split_first() else {
        return (out.len() <= MAX_PALETTES).then_some(out);
    };

    if out.is_empty() {
        out.push(first.clone());
        return pack_palettes(rest, out);
    }

    for i in 0..out.len() {
        let novel = palette_difference(&out[i].colors, &first.colors);
        if novel.is_empty() || out[i].colors.len() + novel.len() <= COLORS_PER_PALETTE {
            let mut dup = out.clone();
            dup[i].colors.extend_from_slice(&novel);
            dup[i].tiles.extend_from_slice(&first.tiles);
            if let Some(packed) = pack_palettes(rest, dup) {
                return Some(packed);
            }
        }
    }

    out.push(first.clone());
    pack_palettes(rest, out)
}

/// Pads a palette to a full 16 entries.
fn pad_palette(palette: &mut Vec<Rgba<u8>>) {
    let rem = palette.len() % COLORS_PER_PALETTE;
    if rem > 0 || palette.is_empty() {
        let pad = COLORS_PER_PALETTE - rem;
        palette.extend(std::iter::repeat(Rgba([0, 0, 0, 0])).take(pad));
    }
}

/// Builds the final concatenated palette and re-indexes every pixel within
/// its own tile's bin.
fn finalize(
    working: &Working,
    bins: &[TilePalette],
    tiles: &[u8; NUM_TILES],
) -> (Vec<Rgba<u8>>, Vec<u8>) {
    let mut palette = Vec::with_capacity(bins.len() * COLORS_PER_PALETTE);
    for bin in bins {
        let mut colors: Vec<Rgba<u8>> = bin
            .colors
            .iter()
            .map(|&id| working.palette[usize::from(id)])
            .collect();
        pad_palette(&mut colors);
        palette.extend(colors);
    }

    let mut pixels = vec![0u8; NUM_PIXELS];
    for y in 0..PIXEL_HEIGHT {
        for x in 0..PIXEL_WIDTH {
            let tile = (y / TILE_HEIGHT) * TILES_X + x / TILE_WIDTH;
            let bin = usize::from(tiles[tile]);
            let id = working.pixel(x, y);
            let pos = bins[bin].colors.iter().position(|&c| c == id);
            debug_assert!(pos.is_some(), "pixel color missing from its bin");
            pixels[y * PIXEL_WIDTH + x] =
                (bin * COLORS_PER_PALETTE + pos.unwrap_or_default()) as u8;
        }
    }

    (palette, pixels)
}

/// Serializes pixels, tile selectors and palette in wire order.
fn write_stream<W: Write>(
    w: &mut W,
    pixels: &[u8],
    tiles: &[u8; NUM_TILES],
    palette: &[Rgba<u8>],
) -> Result<(), TileError> {
    let mut packed = [0u8; PIXEL_BYTES];
    let mut i = 0;
    for ty in 0..TILES_Y {
        for tx in 0..TILES_X {
            for y in 0..TILE_HEIGHT {
                for x in 0..TILE_WIDTH / 2 {
                    let dx = tx * TILE_WIDTH + (x << 1);
                    let dy = ty * TILE_HEIGHT + y;
                    let hi = pixels[dy * PIXEL_WIDTH + dx] & 0x0f;
                    let lo = pixels[dy * PIXEL_WIDTH + dx + 1] & 0x0f;
                    packed[i] = hi << 4 | lo;
                    i += 1;
                }
            }
        }
    }
    w.write_all(&packed)?;

    w.write_all(tiles)?;

    for color in palette {
        let Rgba([r, g, b, _]) = *color;
        // Packed as 0000BBB0 GGG0RRR0, three bits per channel.
        w.write_all(&[(b >> 4) & 0x0e, (g & 0xe0) | ((r >> 4) & 0x0e)])?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_dimensions() {
        let img = RgbaImage::new(64, 41);
        let mut out = Vec::new();
        assert!(matches!(
            encode(&mut out, &img),
            Err(TileError::WrongSize)
        ));
    }

    #[test]
    fn single_color_image() {
        let img = RgbaImage::from_pixel(64, 40, Rgba([0x10, 0x20, 0x30, 0xff]));
        let mut out = Vec::new();
        encode(&mut out, &img).unwrap();

        assert_eq!(out.len(), 1352);
        // Every pixel indexes entry zero of palette zero.
        assert!(out[..PIXEL_BYTES].iter().all(|&b| b == 0));
        assert!(out[PIXEL_BYTES..PIXEL_BYTES + NUM_TILES].iter().all(|&b| b == 0));
        // (0x10, 0x20, 0x30) packs to 02 20.
        assert_eq!(&out[1320..1324], &[0x02, 0x20, 0x00, 0x00]);
    }

    #[test]
    fn three_bands_use_three_palettes() {
        let img = RgbaImage::from_fn(64, 40, |x, y| {
            let band = x as usize / TILE_WIDTH / 3;
            let k = (y as usize % 2) * 8 + x as usize % 8;
            Rgba([
                ((k % 8) as u8) * 0x20,
                ((k / 8) as u8) * 0x20,
                (band as u8) * 0x20,
                0xff,
            ])
        });

        let mut out = Vec::new();
        encode(&mut out, &img).unwrap();
        assert_eq!(out.len(), 1416);

        // Column groups 0-2, 3-5 and 6-7 land in sub-palettes 0, 1 and 2.
        let tiles = &out[PIXEL_BYTES..PIXEL_BYTES + NUM_TILES];
        for (i, &tile) in tiles.iter().enumerate() {
            assert_eq!(usize::from(tile), i % TILES_X / 3, "tile {i}");
        }
    }

    #[test]
    fn closest_pair_prefers_first_minimum() {
        let palette = vec![
            Rgba([0, 0, 0, 0xff]),
            Rgba([0, 0, 10, 0xff]),
            Rgba([0xff, 0, 0, 0xff]),
            Rgba([0xff, 0, 10, 0xff]),
        ];
        // Both (0,1) and (2,3) are 10 blue units apart; the earlier ordered
        // pair wins.
        assert_eq!(closest_pair(&palette, &[0, 1, 2, 3]), (0, 1));
    }

    #[test]
    fn palette_difference_keeps_order() {
        assert_eq!(palette_difference(&[1, 2], &[3, 1, 4]), vec![3, 4]);
        assert!(palette_difference(&[1, 2], &[2, 1]).is_empty());
    }

    #[test]
    fn packing_merges_subsets() {
        let input = vec![
            TilePalette { colors: vec![0, 1, 2], tiles: vec![0] },
            TilePalette { colors: vec![1, 2], tiles: vec![1] },
            TilePalette { colors: vec![2], tiles: vec![2] },
        ];
        let packed = pack_palettes(&input, Vec::new()).unwrap();
        assert_eq!(packed.len(), 1);
        assert_eq!(packed[0].colors, vec![0, 1, 2]);
        assert_eq!(packed[0].tiles, vec![0, 1, 2]);
    }

    #[test]
    fn packing_fails_beyond_three_bins() {
        // Four disjoint 16-color palettes cannot share three bins.
        let input: Vec<TilePalette> = (0..4)
            .map(|i| TilePalette {
                colors: (i * 16..(i + 1) * 16).collect(),
                tiles: vec![i],
            })
            .collect();
        assert!(pack_palettes(&input, Vec::new()).is_none());
    }
}
