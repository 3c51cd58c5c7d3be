//! The screenshot catalog: maps content CRCs to games and their encoded
//! tile screenshots.
//!
//! The catalog is seeded once from a CSV manifest (one row per known
//! checksum) and then queried by the scan pipeline, which asks for the
//! 2048-byte screenshot payload belonging to a content fingerprint.

mod genre;

pub use crate::genre::Genre;

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use bincode::{Decode, Encode};
use sha2::{Digest, Sha256};
use thiserror::Error;

use metadb::SCREENSHOT_SIZE;

/// A screenshot payload as stored in `games.dbs`: the encoded tile image
/// padded to 2048 bytes, with the metadata trailer at 0x700.
pub type Screenshot = [u8; SCREENSHOT_SIZE];

/// Offset of the metadata-enable flag within a payload.
const ENABLE_OFFSET: usize = 0x700;
/// Offset of the genre code within a payload.
const GENRE_OFFSET: usize = 0x701;
/// Offset of the little-endian year within a payload.
const YEAR_OFFSET: usize = 0x702;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("row {row}: {message}")]
    BadRow { row: usize, message: String },
    #[error("unknown genre {0:?}")]
    UnknownGenre(String),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Tile(#[from] tile::TileError),
    #[error("catalog encode: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("catalog decode: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Anything able to resolve a content CRC to a screenshot payload.
///
/// The scan pipeline issues lookups from up to ten workers at once, so
/// implementations must tolerate concurrent reads.
pub trait ScreenshotSource: Send + Sync {
    /// Looks up the payload for an uppercase, zero-padded hex CRC.
    fn find_screenshot_by_crc(&self, crc: &str) -> Result<Option<Screenshot>, CatalogError>;
}

#[derive(Debug, Default, Encode, Decode)]
struct CatalogData {
    games: Vec<GameRecord>,
    screenshots: Vec<ScreenshotRecord>,
    checksums: HashMap<String, u32>,
}

#[derive(Debug, Encode, Decode)]
struct GameRecord {
    name: String,
    year: Option<u16>,
    genre: Option<Genre>,
    screenshot: Option<u32>,
}

#[derive(Debug, Encode, Decode)]
struct ScreenshotRecord {
    sha256: String,
    tile: Vec<u8>,
}

/// Totals reported by [`GameCatalog::import_csv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportStats {
    pub games: usize,
    pub screenshots: usize,
    pub checksums: usize,
}

/// A file-backed game catalog.
#[derive(Debug)]
pub struct GameCatalog {
    path: PathBuf,
    data: CatalogData,
}

impl GameCatalog {
    /// Loads the catalog at `path`, or starts an empty one when the file
    /// does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let path = path.into();
        let data = match File::open(&path) {
            Ok(file) => {
                let mut reader = BufReader::new(file);
                bincode::decode_from_std_read(&mut reader, bincode::config::standard())?
            }
            Err(err) if err.kind() == ErrorKind::NotFound => CatalogData::default(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self { path, data })
    }

    /// Writes the catalog back to its file.
    pub fn save(&self) -> Result<(), CatalogError> {
        let mut writer = BufWriter::new(File::create(&self.path)?);
        bincode::encode_into_std_write(&self.data, &mut writer, bincode::config::standard())?;
        writer.flush()?;
        Ok(())
    }

    /// Number of checksums known to the catalog.
    pub fn len(&self) -> usize {
        self.data.checksums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.checksums.is_empty()
    }

    /// Replaces the catalog contents from a CSV manifest with the columns
    /// `crc,name,year,genre,screenshot`; one row per checksum, rows sharing
    /// a name describe the same game. Screenshot paths resolve relative to
    /// the manifest and are re-encoded as tile images; identical files are
    /// stored once, keyed by their SHA-256.
    pub fn import_csv(&mut self, manifest: &Path) -> Result<ImportStats, CatalogError> {
        let mut reader = csv::Reader::from_path(manifest)?;
        let base = manifest.parent().unwrap_or(Path::new("")).to_path_buf();

        self.data = CatalogData::default();
        let mut games_by_name: HashMap<String, u32> = HashMap::new();
        let mut screenshots_by_digest: HashMap<String, u32> = HashMap::new();

        for (i, record) in reader.records().enumerate() {
            let record = record?;
            let row = i + 2; // line number; the header is line one
            let field = |index: usize| record.get(index).unwrap_or("").trim();

            let crc = field(0);
            if crc.is_empty() {
                return Err(CatalogError::BadRow {
                    row,
                    message: "missing checksum".to_string(),
                });
            }
            let crc = format!("{:0>8}", crc.to_uppercase());

            let name = field(1);
            if name.is_empty() {
                return Err(CatalogError::BadRow {
                    row,
                    message: "missing game name".to_string(),
                });
            }

            let game = match games_by_name.get(name) {
                Some(&game) => game,
                None => {
                    let year = match field(2) {
                        "" => None,
                        year => Some(year.parse::<u16>().map_err(|_| CatalogError::BadRow {
                            row,
                            message: format!("bad year {year:?}"),
                        })?),
                    };
                    let genre = match field(3) {
                        "" => None,
                        genre => Some(genre.parse::<Genre>()?),
                    };
                    let screenshot = match field(4) {
                        "" => None,
                        file => {
                            Some(self.add_screenshot(&base.join(file), &mut screenshots_by_digest)?)
                        }
                    };

                    let game = self.data.games.len() as u32;
                    self.data.games.push(GameRecord {
                        name: name.to_string(),
                        year,
                        genre,
                        screenshot,
                    });
                    games_by_name.insert(name.to_string(), game);
                    game
                }
            };

            self.data.checksums.insert(crc, game);
        }

        Ok(ImportStats {
            games: self.data.games.len(),
            screenshots: self.data.screenshots.len(),
            checksums: self.data.checksums.len(),
        })
    }

    /// Decodes an image file, converts it to a tile stream, and stores it
    /// unless an identical file was stored before.
    fn add_screenshot(
        &mut self,
        path: &Path,
        by_digest: &mut HashMap<String, u32>,
    ) -> Result<u32, CatalogError> {
        let bytes = fs::read(path)?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let sha256 = format!("{:x}", hasher.finalize());

        if let Some(&index) = by_digest.get(&sha256) {
            return Ok(index);
        }

        let img = image::load_from_memory(&bytes)?.to_rgba8();
        let mut tile_bytes = Vec::new();
        tile::encode(&mut tile_bytes, &img)?;

        let index = self.data.screenshots.len() as u32;
        self.data.screenshots.push(ScreenshotRecord {
            sha256: sha256.clone(),
            tile: tile_bytes,
        });
        by_digest.insert(sha256, index);
        Ok(index)
    }
}

impl ScreenshotSource for GameCatalog {
    fn find_screenshot_by_crc(&self, crc: &str) -> Result<Option<Screenshot>, CatalogError> {
        let Some(&game) = self.data.checksums.get(crc) else {
            return Ok(None);
        };
        let game = &self.data.games[game as usize];
        let Some(index) = game.screenshot else {
            return Ok(None);
        };
        let tile_bytes = &self.data.screenshots[index as usize].tile;

        let mut payload = [0u8; SCREENSHOT_SIZE];
        let n = tile_bytes.len().min(ENABLE_OFFSET);
        payload[..n].copy_from_slice(&tile_bytes[..n]);

        // The enable flag is set even when year and genre are both absent,
        // matching what the cartridge's own tooling writes.
        payload[ENABLE_OFFSET] = 1;
        if let Some(genre) = game.genre {
            payload[GENRE_OFFSET] = genre.code();
        }
        if let Some(year) = game.year {
            payload[YEAR_OFFSET..YEAR_OFFSET + 2].copy_from_slice(&year.to_le_bytes());
        }

        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn write_screenshot(dir: &Path, name: &str, color: Rgba<u8>) -> PathBuf {
        let img = RgbaImage::from_pixel(64, 40, color);
        let path = dir.join(name);
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
            .unwrap();
        fs::write(&path, bytes).unwrap();
        path
    }

    fn write_manifest(dir: &Path, rows: &str) -> PathBuf {
        let path = dir.join("games.csv");
        fs::write(&path, format!("crc,name,year,genre,screenshot\n{rows}")).unwrap();
        path
    }

    #[test]
    fn import_and_lookup() {
        let dir = TempDir::new().unwrap();
        write_screenshot(dir.path(), "sonic.png", Rgba([0x20, 0x40, 0x60, 0xff]));
        let manifest = write_manifest(
            dir.path(),
            "554D5255,Sonic The Hedgehog,1991,Platform,sonic.png\n\
             AB12CD34,Sonic The Hedgehog,,,sonic.png\n",
        );

        let mut cat = GameCatalog::open(dir.path().join("megasd.db")).unwrap();
        let stats = cat.import_csv(&manifest).unwrap();
        assert_eq!(
            stats,
            ImportStats {
                games: 1,
                screenshots: 1,
                checksums: 2
            }
        );

        let payload = cat.find_screenshot_by_crc("554D5255").unwrap().unwrap();
        // A flat (0x20, 0x40, 0x60) image encodes as all-zero pixels and
        // selectors with the color packed into the first palette entry.
        assert!(payload[..1320].iter().all(|&b| b == 0));
        assert_eq!(&payload[1320..1322], &[0x06, 0x42]);
        assert_eq!(payload[0x700], 1);
        assert_eq!(payload[0x701], Genre::Platform.code());
        assert_eq!(u16::from_le_bytes([payload[0x702], payload[0x703]]), 1991);

        // The second checksum resolves to the same game.
        let other = cat.find_screenshot_by_crc("AB12CD34").unwrap().unwrap();
        assert_eq!(payload, other);

        assert!(cat.find_screenshot_by_crc("00000000").unwrap().is_none());
    }

    #[test]
    fn enable_flag_is_set_without_year_or_genre() {
        let dir = TempDir::new().unwrap();
        write_screenshot(dir.path(), "shot.png", Rgba([0x20, 0x20, 0x20, 0xff]));
        let manifest = write_manifest(dir.path(), "00000001,Bare Game,,,shot.png\n");

        let mut cat = GameCatalog::open(dir.path().join("megasd.db")).unwrap();
        cat.import_csv(&manifest).unwrap();

        let payload = cat.find_screenshot_by_crc("00000001").unwrap().unwrap();
        assert_eq!(payload[0x700], 1);
        assert_eq!(payload[0x701], 0);
        assert_eq!(&payload[0x702..=0x703], &[0, 0]);
    }

    #[test]
    fn game_without_screenshot_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let manifest = write_manifest(dir.path(), "00000002,No Art,1993,Action,\n");

        let mut cat = GameCatalog::open(dir.path().join("megasd.db")).unwrap();
        cat.import_csv(&manifest).unwrap();
        assert!(cat.find_screenshot_by_crc("00000002").unwrap().is_none());
    }

    #[test]
    fn checksum_is_normalized() {
        let dir = TempDir::new().unwrap();
        let manifest = write_manifest(dir.path(), "ab1,Short Checksum,,,\n");

        let mut cat = GameCatalog::open(dir.path().join("megasd.db")).unwrap();
        cat.import_csv(&manifest).unwrap();
        assert_eq!(cat.len(), 1);
        // Stored uppercase, padded to eight digits; lookups without a
        // screenshot still miss, but the key exists.
        assert!(cat.data.checksums.contains_key("00000AB1"));
    }

    #[test]
    fn identical_screenshots_share_storage() {
        let dir = TempDir::new().unwrap();
        write_screenshot(dir.path(), "a.png", Rgba([0x60, 0x20, 0x00, 0xff]));
        fs::copy(dir.path().join("a.png"), dir.path().join("b.png")).unwrap();
        let manifest = write_manifest(
            dir.path(),
            "00000001,First,,,a.png\n00000002,Second,,,b.png\n",
        );

        let mut cat = GameCatalog::open(dir.path().join("megasd.db")).unwrap();
        let stats = cat.import_csv(&manifest).unwrap();
        assert_eq!(stats.games, 2);
        assert_eq!(stats.screenshots, 1);
    }

    #[test]
    fn save_and_reopen() {
        let dir = TempDir::new().unwrap();
        write_screenshot(dir.path(), "shot.png", Rgba([0x00, 0x40, 0x80, 0xff]));
        let manifest = write_manifest(dir.path(), "0000BEEF,Kept Game,1994,9,shot.png\n");

        let db_path = dir.path().join("megasd.db");
        let mut cat = GameCatalog::open(&db_path).unwrap();
        cat.import_csv(&manifest).unwrap();
        cat.save().unwrap();

        let reopened = GameCatalog::open(&db_path).unwrap();
        assert_eq!(reopened.len(), 1);
        let payload = reopened.find_screenshot_by_crc("0000BEEF").unwrap().unwrap();
        assert_eq!(payload[0x701], Genre::Boxing.code());
    }

    #[test]
    fn bad_year_is_rejected() {
        let dir = TempDir::new().unwrap();
        let manifest = write_manifest(dir.path(), "00000001,Oops,nineteen,,\n");

        let mut cat = GameCatalog::open(dir.path().join("megasd.db")).unwrap();
        assert!(matches!(
            cat.import_csv(&manifest),
            Err(CatalogError::BadRow { row: 2, .. })
        ));
    }
}
