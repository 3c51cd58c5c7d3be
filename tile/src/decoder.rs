use std::io::{ErrorKind, Read};

use image::Rgba;

use crate::indexed::IndexedImage;
use crate::{
    TileError, COLORS_PER_PALETTE, MAX_PALETTES, NUM_PIXELS, NUM_TILES, PIXEL_BYTES,
    PIXEL_HEIGHT, PIXEL_WIDTH, TILES_X, TILES_Y, TILE_HEIGHT, TILE_WIDTH,
};

/// Dimensions and palette of a tile stream, recovered without materialising
/// the pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileConfig {
    pub width: u32,
    pub height: u32,
    pub palette: Vec<Rgba<u8>>,
}

/// Reads a tile stream from `r` and reconstructs the indexed image.
pub fn decode<R: Read>(r: R) -> Result<IndexedImage, TileError> {
    let (tmp, palette) = parse(r)?;

    let mut pixels = vec![0u8; NUM_PIXELS];
    for ty in 0..TILES_Y {
        for tx in 0..TILES_X {
            let tile = ty * TILES_X + tx;
            let base = tmp[PIXEL_BYTES + tile] * COLORS_PER_PALETTE as u8;
            for y in 0..TILE_HEIGHT {
                for x in 0..TILE_WIDTH / 2 {
                    let b = tmp[tile * (TILE_WIDTH * TILE_HEIGHT / 2) + y * (TILE_WIDTH / 2) + x];
                    let dx = tx * TILE_WIDTH + (x << 1);
                    let dy = ty * TILE_HEIGHT + y;
                    pixels[dy * PIXEL_WIDTH + dx] = base + (b >> 4);
                    pixels[dy * PIXEL_WIDTH + dx + 1] = base + (b & 0x0f);
                }
            }
        }
    }

    Ok(IndexedImage::new(pixels, palette))
}

/// Like [`decode`] but only parses the stream far enough to report its
/// dimensions and palette.
pub fn decode_config<R: Read>(r: R) -> Result<TileConfig, TileError> {
    let (_, palette) = parse(r)?;
    Ok(TileConfig {
        width: PIXEL_WIDTH as u32,
        height: PIXEL_HEIGHT as u32,
        palette,
    })
}

fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<(), TileError> {
    r.read_exact(buf).map_err(|err| match err.kind() {
        ErrorKind::UnexpectedEof => TileError::NotEnough,
        _ => TileError::Io(err),
    })
}

/// Reads pixels, tile selectors and palette, and requires the stream to end
/// exactly there.
fn parse<R: Read>(mut r: R) -> Result<([u8; PIXEL_BYTES + NUM_TILES], Vec<Rgba<u8>>), TileError> {
    let mut tmp = [0u8; PIXEL_BYTES + NUM_TILES];
    read_full(&mut r, &mut tmp)?;

    let mut num_palettes = 0usize;
    for &b in &tmp[PIXEL_BYTES..] {
        if usize::from(b) >= MAX_PALETTES {
            return Err(TileError::BadPalette);
        }
        num_palettes = num_palettes.max(usize::from(b));
    }
    num_palettes += 1;

    let mut palette = Vec::with_capacity(num_palettes * COLORS_PER_PALETTE);
    for _ in 0..num_palettes * COLORS_PER_PALETTE {
        let mut c = [0u8; 2];
        read_full(&mut r, &mut c)?;
        // Color is packed as 0000BBB0 GGG0RRR0.
        palette.push(Rgba([
            (c[1] & 0x0f) << 4,
            c[1] & 0xf0,
            (c[0] & 0x0f) << 4,
            0xff,
        ]));
    }

    let mut extra = [0u8; 1];
    loop {
        match r.read(&mut extra) {
            Ok(0) => break,
            Ok(_) => return Err(TileError::TooMuch),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(TileError::Io(err)),
        }
    }

    Ok((tmp, palette))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_stream() -> Vec<u8> {
        let mut stream = vec![0u8; PIXEL_BYTES + NUM_TILES];
        stream.extend_from_slice(&[0u8; 32]);
        stream
    }

    #[test]
    fn truncated_stream() {
        assert!(matches!(
            decode(&minimal_stream()[..100]),
            Err(TileError::NotEnough)
        ));
        // Cut inside the palette block.
        assert!(matches!(
            decode(&minimal_stream()[..PIXEL_BYTES + NUM_TILES + 7]),
            Err(TileError::NotEnough)
        ));
    }

    #[test]
    fn trailing_bytes() {
        let mut stream = minimal_stream();
        stream.push(0);
        assert!(matches!(decode(stream.as_slice()), Err(TileError::TooMuch)));
    }

    #[test]
    fn out_of_range_tile_selector() {
        let mut stream = minimal_stream();
        stream[PIXEL_BYTES] = MAX_PALETTES as u8;
        assert!(matches!(
            decode(stream.as_slice()),
            Err(TileError::BadPalette)
        ));
    }

    #[test]
    fn selector_count_sets_palette_size() {
        let mut stream = vec![0u8; PIXEL_BYTES + NUM_TILES];
        stream[PIXEL_BYTES + 5] = 1;
        stream.extend_from_slice(&[0u8; 64]);

        let config = decode_config(stream.as_slice()).unwrap();
        assert_eq!(config.palette.len(), 2 * COLORS_PER_PALETTE);
    }

    #[test]
    fn unpacks_colors() {
        let mut stream = vec![0u8; PIXEL_BYTES + NUM_TILES];
        stream.extend_from_slice(&[0x02, 0x20]);
        stream.extend_from_slice(&[0u8; 30]);

        let decoded = decode(stream.as_slice()).unwrap();
        assert_eq!(decoded.color_at(0, 0), Rgba([0x00, 0x20, 0x20, 0xff]));
    }

    #[test]
    fn nibbles_map_to_tile_local_indices() {
        let mut stream = vec![0u8; PIXEL_BYTES + NUM_TILES];
        // First byte of tile zero covers pixels (0,0) and (1,0).
        stream[0] = 0x12;
        // Tile 9 (second row, second column) uses sub-palette 1.
        stream[PIXEL_BYTES + 9] = 1;
        stream.extend_from_slice(&[0u8; 64]);

        let decoded = decode(stream.as_slice()).unwrap();
        assert_eq!(decoded.index_at(0, 0), 1);
        assert_eq!(decoded.index_at(1, 0), 2);
        // Tile 9's top-left pixel is (8, 8); its indices are offset by 16.
        assert_eq!(decoded.index_at(8, 8), 16);
    }
}
