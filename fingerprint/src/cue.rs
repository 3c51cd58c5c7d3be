//! Minimal cue-sheet parsing.
//!
//! Just enough to locate the first data track of a CD image: `FILE` and
//! `TRACK` directives are collected in order, everything else (`INDEX`,
//! `PREGAP`, `REM`, ...) is ignored.

use std::fs;
use std::path::Path;

use thiserror::Error;

/// Track data type for raw 2048-byte user data sectors.
pub const MODE1_2048: &str = "MODE1/2048";
/// Track data type with a 16-byte sync/header and 288-byte ECC trailer per
/// sector.
pub const MODE1_2352: &str = "MODE1/2352";

#[derive(Debug, Error)]
pub enum CueError {
    #[error("cue sheet contains no FILE entries")]
    NoFiles,
    #[error("malformed {directive} line: {line:?}")]
    Malformed {
        directive: &'static str,
        line: String,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A parsed cue sheet: files in declaration order, each with its tracks.
#[derive(Debug, Clone)]
pub struct CueSheet {
    pub files: Vec<CueFile>,
}

#[derive(Debug, Clone)]
pub struct CueFile {
    pub name: String,
    pub file_type: String,
    pub tracks: Vec<CueTrack>,
}

#[derive(Debug, Clone)]
pub struct CueTrack {
    pub number: u8,
    pub data_type: String,
}

pub fn parse_file(path: &Path) -> Result<CueSheet, CueError> {
    parse(&fs::read_to_string(path)?)
}

pub fn parse(content: &str) -> Result<CueSheet, CueError> {
    let mut files: Vec<CueFile> = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let upper = line.to_uppercase();
        if upper.starts_with("FILE ") {
            let (name, file_type) = parse_file_line(line)?;
            files.push(CueFile {
                name,
                file_type,
                tracks: Vec::new(),
            });
        } else if upper.starts_with("TRACK ") {
            let track = parse_track_line(line)?;
            match files.last_mut() {
                Some(file) => file.tracks.push(track),
                None => {
                    return Err(CueError::Malformed {
                        directive: "TRACK",
                        line: line.to_string(),
                    })
                }
            }
        }
    }

    if files.is_empty() {
        return Err(CueError::NoFiles);
    }

    Ok(CueSheet { files })
}

/// `FILE "filename.bin" BINARY`; the filename may be unquoted.
fn parse_file_line(line: &str) -> Result<(String, String), CueError> {
    let malformed = || CueError::Malformed {
        directive: "FILE",
        line: line.to_string(),
    };

    let rest = line[5..].trim_start();
    if let Some(stripped) = rest.strip_prefix('"') {
        let end = stripped.find('"').ok_or_else(malformed)?;
        let name = stripped[..end].to_string();
        let file_type = stripped[end + 1..].trim().to_string();
        Ok((name, file_type))
    } else {
        let mut parts = rest.splitn(2, ' ');
        let name = parts.next().ok_or_else(malformed)?.to_string();
        let file_type = parts.next().unwrap_or("").trim().to_string();
        Ok((name, file_type))
    }
}

/// `TRACK 01 MODE1/2352`
fn parse_track_line(line: &str) -> Result<CueTrack, CueError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 3 {
        return Err(CueError::Malformed {
            directive: "TRACK",
            line: line.to_string(),
        });
    }

    let number = parts[1].parse().map_err(|_| CueError::Malformed {
        directive: "TRACK",
        line: line.to_string(),
    })?;

    Ok(CueTrack {
        number,
        data_type: parts[2].to_string(),
    })
}
