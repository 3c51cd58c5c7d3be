//! The small metadata database written to each directory on a MegaSD
//! filesystem that contains ROM or CD images.
//!
//! The layout is fixed: 1024 little-endian u32 checksum slots sorted
//! ascending (unused slots hold `0xFFFFFFFF`), 1024 little-endian u16
//! screenshot indices parallel to them (unused slots hold `0xFFFF`), then
//! the 2048-byte screenshot payloads in first-insertion order.

use std::collections::HashMap;

use thiserror::Error;

/// The filename the cartridge expects in every game directory.
pub const FILENAME: &str = "games.dbs";

/// Expected size in bytes of each screenshot payload.
pub const SCREENSHOT_SIZE: usize = 2048;

const MAX_ENTRIES: usize = 1024;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("incorrect length")]
    WrongScreenshotSize,
    #[error("more than {MAX_ENTRIES} entries")]
    TooManyEntries,
    #[error("insufficient data")]
    InsufficientData,
}

/// The per-directory metadata database, keyed by filename CRC.
#[derive(Debug, Default, Clone)]
pub struct MetaDb {
    checksums: HashMap<u32, u16>,
    screenshots: Vec<[u8; SCREENSHOT_SIZE]>,
    by_content: HashMap<[u8; SCREENSHOT_SIZE], u16>,
}

impl MetaDb {
    /// Returns an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of checksums in the database.
    pub fn len(&self) -> usize {
        self.checksums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checksums.is_empty()
    }

    /// Stores `screenshot` for `crc`. The first insertion for a CRC wins;
    /// repeating it is a no-op. Checksums sharing identical payload bytes
    /// share a single payload slot.
    pub fn set(&mut self, crc: u32, screenshot: &[u8]) -> Result<(), DbError> {
        let screenshot: &[u8; SCREENSHOT_SIZE] = screenshot
            .try_into()
            .map_err(|_| DbError::WrongScreenshotSize)?;

        if self.checksums.contains_key(&crc) {
            return Ok(());
        }

        let index = match self.by_content.get(screenshot) {
            Some(&index) => index,
            None => {
                let index = self.screenshots.len() as u16;
                self.screenshots.push(*screenshot);
                self.by_content.insert(*screenshot, index);
                index
            }
        };
        self.checksums.insert(crc, index);
        Ok(())
    }

    /// Screenshot payload stored for `crc`, if any.
    pub fn get(&self, crc: u32) -> Option<&[u8; SCREENSHOT_SIZE]> {
        self.checksums
            .get(&crc)
            .map(|&index| &self.screenshots[usize::from(index)])
    }

    /// Encodes the database into its on-disk form.
    pub fn encode(&self) -> Result<Vec<u8>, DbError> {
        let length = self.checksums.len();
        if length > MAX_ENTRIES {
            return Err(DbError::TooManyEntries);
        }

        let mut keys: Vec<u32> = self.checksums.keys().copied().collect();
        keys.sort_unstable();

        let mut out =
            Vec::with_capacity(MAX_ENTRIES * 6 + self.screenshots.len() * SCREENSHOT_SIZE);

        for key in &keys {
            out.extend_from_slice(&key.to_le_bytes());
        }
        for _ in length..MAX_ENTRIES {
            out.extend_from_slice(&[0xff; 4]);
        }

        for key in &keys {
            out.extend_from_slice(&self.checksums[key].to_le_bytes());
        }
        for _ in length..MAX_ENTRIES {
            out.extend_from_slice(&[0xff; 2]);
        }

        for screenshot in &self.screenshots {
            out.extend_from_slice(screenshot);
        }

        Ok(out)
    }

    /// Decodes a database from its on-disk form.
    pub fn decode(data: &[u8]) -> Result<Self, DbError> {
        let mut cursor = Cursor { data, offset: 0 };

        let mut keys = Vec::new();
        for _ in 0..MAX_ENTRIES {
            let crc = u32::from_le_bytes(cursor.take::<4>()?);
            if crc != 0xffff_ffff {
                keys.push(crc);
            }
        }

        let mut checksums = HashMap::new();
        let mut max_index = None;
        for i in 0..MAX_ENTRIES {
            let index = u16::from_le_bytes(cursor.take::<2>()?);
            if index != 0xffff && i < keys.len() {
                checksums.insert(keys[i], index);
                max_index = Some(max_index.map_or(index, |m: u16| m.max(index)));
            }
        }

        let mut screenshots = Vec::new();
        let mut by_content = HashMap::new();
        if let Some(max_index) = max_index {
            for i in 0..=max_index {
                let screenshot = cursor.take::<SCREENSHOT_SIZE>()?;
                by_content.entry(screenshot).or_insert(i);
                screenshots.push(screenshot);
            }
        }

        Ok(Self {
            checksums,
            screenshots,
            by_content,
        })
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl Cursor<'_> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], DbError> {
        let end = self.offset.checked_add(N).ok_or(DbError::InsufficientData)?;
        let bytes = self
            .data
            .get(self.offset..end)
            .ok_or(DbError::InsufficientData)?;
        self.offset = end;
        // get() returned exactly N bytes
        Ok(bytes.try_into().unwrap_or([0u8; N]))
    }
}
