//! Filesystem scan pipeline.
//!
//! One producer walks the tree and feeds every directory to a fixed pool of
//! workers over a rendezvous channel. Each worker builds a fresh metadata
//! database for its directory: ROM and CD images are fingerprinted, looked
//! up in the screenshot catalog, and collected under their filename CRC;
//! directories that yield at least one entry get a `games.dbs`. The first
//! worker error cancels the producer and is returned to the caller.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use log::info;
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

use catalog::{CatalogError, ScreenshotSource};
use fingerprint::FingerprintError;
use metadb::{DbError, MetaDb};

/// Size of the worker pool used by [`scan`] unless overridden.
pub const DEFAULT_WORKERS: usize = 10;

/// Files larger than this cannot be ROM images worth fingerprinting.
const MAX_FILE_SIZE: u64 = 16 << 20;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Walk(#[from] walkdir::Error),
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Walks `root` and writes a `games.dbs` into every directory that contains
/// recognised games, resolving screenshots through `source`.
pub fn scan<S>(root: &Path, source: &S, workers: usize) -> Result<(), ScanError>
where
    S: ScreenshotSource + ?Sized,
{
    let workers = workers.max(1);
    let cancelled = AtomicBool::new(false);
    let (dir_tx, dir_rx) = mpsc::sync_channel::<PathBuf>(0);
    let dir_rx = Arc::new(Mutex::new(dir_rx));
    let (err_tx, err_rx) = mpsc::channel::<ScanError>();

    thread::scope(|scope| {
        let cancelled = &cancelled;

        let producer_err = err_tx.clone();
        scope.spawn(move || {
            let walker = WalkDir::new(root)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(keep_entry);
            for entry in walker {
                if cancelled.load(Ordering::Relaxed) {
                    break;
                }
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        let _ = producer_err.send(err.into());
                        break;
                    }
                };
                if !entry.file_type().is_dir() {
                    continue;
                }
                if dir_tx.send(entry.into_path()).is_err() {
                    // Every worker is gone; nothing is left to feed.
                    break;
                }
            }
        });

        for _ in 0..workers {
            let dir_rx = Arc::clone(&dir_rx);
            let err_tx = err_tx.clone();
            scope.spawn(move || loop {
                let received = {
                    let Ok(rx) = dir_rx.lock() else { break };
                    rx.recv()
                };
                let dir = match received {
                    Ok(dir) => dir,
                    Err(_) => break,
                };
                if let Err(err) = process_directory(&dir, source) {
                    let _ = err_tx.send(err);
                    cancelled.store(true, Ordering::Relaxed);
                    break;
                }
            });
        }

        // The threads hold their own clones.
        drop(dir_rx);
        drop(err_tx);
    });

    match err_rx.try_recv() {
        Ok(err) => Err(err),
        Err(_) => Ok(()),
    }
}

/// Hidden files and directories are ignored, otherwise we end up fighting
/// with things like Spotlight indexes. The walk root itself is exempt so
/// that scanning `.` works.
fn keep_entry(entry: &DirEntry) -> bool {
    entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
}

/// Builds and writes the metadata database for one directory.
fn process_directory<S>(dir: &Path, source: &S) -> Result<(), ScanError>
where
    S: ScreenshotSource + ?Sized,
{
    let mut db = MetaDb::new();

    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(keep_entry);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.metadata()?.len() > MAX_FILE_SIZE {
            continue;
        }

        let path = entry.path();
        let Some(ext) = path.extension().and_then(OsStr::to_str) else {
            continue;
        };

        match ext {
            "bin" | "32x" | "md" | "sg" | "sms" => {
                // A .bin next to a cue sheet is CD track data owned by the
                // sheet, not a standalone ROM.
                if ext == "bin" && has_cue_sibling(path)? {
                    continue;
                }
                // ROMs only count in the directory being processed, not in
                // its subdirectories.
                if entry.depth() != 1 {
                    continue;
                }
                scan_rom(path, source, &mut db)?;
            }
            "cue" => {
                // CD games live one level down: the cue names the game's
                // own directory.
                if entry.depth() != 2 {
                    continue;
                }
                scan_cd(path, source, &mut db)?;
            }
            _ => {}
        }
    }

    if !db.is_empty() {
        fs::write(dir.join(metadb::FILENAME), db.encode()?)?;
    }

    Ok(())
}

fn scan_rom<S>(path: &Path, source: &S, db: &mut MetaDb) -> Result<(), ScanError>
where
    S: ScreenshotSource + ?Sized,
{
    let Some(crc) = fingerprint::crc_rom(path)? else {
        return Ok(());
    };
    let name = path.file_stem().map(OsStr::to_string_lossy).unwrap_or_default();
    lookup(path, &fingerprint::hex(crc), &name, source, db)
}

fn scan_cd<S>(path: &Path, source: &S, db: &mut MetaDb) -> Result<(), ScanError>
where
    S: ScreenshotSource + ?Sized,
{
    let Some(crc) = fingerprint::crc_cue(path)? else {
        return Ok(());
    };
    let name = path
        .parent()
        .and_then(Path::file_name)
        .map(OsStr::to_string_lossy)
        .unwrap_or_default();
    lookup(path, &fingerprint::hex(crc), &name, source, db)
}

fn lookup<S>(
    path: &Path,
    crc: &str,
    name: &str,
    source: &S,
    db: &mut MetaDb,
) -> Result<(), ScanError>
where
    S: ScreenshotSource + ?Sized,
{
    match source.find_screenshot_by_crc(crc)? {
        Some(screenshot) => db.set(fingerprint::crc_filename(name), &screenshot)?,
        None => info!("No match for \"{}\", with CRC \"{}\"", path.display(), crc),
    }
    Ok(())
}

fn has_cue_sibling(path: &Path) -> Result<bool, ScanError> {
    let Some(dir) = path.parent() else {
        return Ok(false);
    };
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.path().extension().and_then(OsStr::to_str) == Some("cue") {
            return Ok(true);
        }
    }
    Ok(false)
}
