//! Content and filename fingerprints for games on a MegaSD filesystem.
//!
//! Two fingerprints coexist per game: the content CRC (a ROM body after its
//! copier-header skip, or the first data sector of a CD image) keys the
//! screenshot catalog, and the filename CRC keys the per-directory metadata
//! database read by the cartridge menu.

pub mod crc32;
pub mod cue;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use log::warn;
use thiserror::Error;

/// Sync + header bytes preceding the user data in a `MODE1/2352` sector.
const SECTOR_HEADER: u64 = 16;
/// User data bytes per sector.
const SECTOR_SIZE: usize = 2048;
/// Offset of the `SEGA` signature within the first data sector.
const SIGNATURE_OFFSET: usize = 0x100;
/// Filenames are hashed over a fixed-width buffer of this many bytes.
const FILENAME_TRIM: usize = 56;

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("audio-only CDs are not supported for hashing")]
    UnsupportedCue,
    #[error("invalid signature")]
    InvalidSignature,
    #[error(transparent)]
    Cue(#[from] cue::CueError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Uppercase, zero-padded hex rendering of a fingerprint, as stored in the
/// screenshot catalog.
pub fn hex(crc: u32) -> String {
    format!("{crc:08X}")
}

/// Content CRC of a ROM image.
///
/// Dumps carry an optional copier header whose size is always the file
/// length modulo 4096; seek past it and hash the rest. Returns `None` when
/// the file cannot be seeked, matching the original tool which skips such
/// files rather than failing the scan.
pub fn crc_rom(path: &Path) -> Result<Option<u32>, FingerprintError> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();

    let skip = size & 0xfff;
    if let Err(err) = file.seek(SeekFrom::Start(skip)) {
        warn!("skipping {}: {err}", path.display());
        return Ok(None);
    }

    let mut crc = 0;
    let mut chunk = [0u8; 4096];
    let mut remaining = size - skip;
    while remaining > 0 {
        file.read_exact(&mut chunk)?;
        crc = crc32::update(crc, &chunk);
        remaining -= chunk.len() as u64;
    }

    Ok(Some(crc))
}

/// Content CRC of a CD image described by a cue sheet.
///
/// Hashes the first 2048-byte data sector of the first `MODE1/2048` or
/// `MODE1/2352` track, after validating the `SEGA` signature at offset
/// 0x100. A cue sheet without a data track is rejected outright; an
/// unreadable data file is logged and skipped like [`crc_rom`] soft
/// failures.
pub fn crc_cue(path: &Path) -> Result<Option<u32>, FingerprintError> {
    let sheet = cue::parse_file(path)?;
    let (file_name, data_type) =
        first_data_track(&sheet).ok_or(FingerprintError::UnsupportedCue)?;

    let data_path = match path.parent() {
        Some(dir) => dir.join(file_name),
        None => Path::new(file_name).to_path_buf(),
    };

    let mut file = match File::open(&data_path) {
        Ok(file) => file,
        Err(err) => {
            warn!("skipping {}: {err}", data_path.display());
            return Ok(None);
        }
    };

    if data_type == cue::MODE1_2352 {
        if let Err(err) = file.seek(SeekFrom::Current(SECTOR_HEADER as i64)) {
            warn!("skipping {}: {err}", data_path.display());
            return Ok(None);
        }
    }

    let mut sector = [0u8; SECTOR_SIZE];
    if let Err(err) = file.read_exact(&mut sector) {
        warn!("skipping {}: {err}", data_path.display());
        return Ok(None);
    }

    if &sector[SIGNATURE_OFFSET..SIGNATURE_OFFSET + 4] != b"SEGA" {
        return Err(FingerprintError::InvalidSignature);
    }

    Ok(Some(crc32::checksum(&sector)))
}

fn first_data_track(sheet: &cue::CueSheet) -> Option<(&str, &str)> {
    for file in &sheet.files {
        for track in &file.tracks {
            if track.data_type == cue::MODE1_2048 || track.data_type == cue::MODE1_2352 {
                return Some((&file.name, &track.data_type));
            }
        }
    }
    None
}

/// CRC of a bare game name, used as the metadata database key.
///
/// The firmware hashes the uppercased name over a space-padded 56-byte
/// buffer with an all-ones seed.
pub fn crc_filename(name: &str) -> u32 {
    let mut buf = [b' '; FILENAME_TRIM];
    let upper = name.to_uppercase();
    let bytes = upper.as_bytes();
    let n = bytes.len().min(FILENAME_TRIM);
    buf[..n].copy_from_slice(&bytes[..n]);
    crc32::update(0xffff_ffff, &buf)
}
