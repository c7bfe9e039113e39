//! Board save/load.
//!
//! Supports two formats:
//! - `.zoo` - Binary format (fast, compact)
//! - `.json` - JSON format (human readable, debuggable)
//!
//! A snapshot holds every cell's particle name, write counter and bonds.
//! Loading restores into an existing board of the same size, so the rules
//! come from the board, not the file.
//!
//! # Example
//!
//! ```ignore
//! use zoo_core::board_io::{save_board, load_board};
//!
//! save_board(&board, "boards/sandbox.zoo")?;
//! load_board(&mut board, "boards/sandbox.zoo")?;
//! ```

use super::board::Board;
use super::topology::{Point, Topology};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::info;

/// Magic bytes for binary board files
const MAGIC: &[u8; 8] = b"ZOOBOARD";

/// Current file format version
const VERSION: u32 = 1;

/// Errors that can occur during board I/O.
#[derive(Debug)]
pub enum SnapshotError {
    /// File system error
    Io(std::io::Error),
    /// Binary serialization error
    Bincode(bincode::Error),
    /// JSON serialization error
    Json(String),
    /// Invalid file format
    InvalidFormat(String),
    /// Unsupported version
    UnsupportedVersion(u32),
    /// Snapshot does not fit the board
    DimensionMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotError::Io(e) => write!(f, "IO error: {}", e),
            SnapshotError::Bincode(e) => write!(f, "Bincode error: {}", e),
            SnapshotError::Json(e) => write!(f, "JSON error: {}", e),
            SnapshotError::InvalidFormat(msg) => write!(f, "Invalid format: {}", msg),
            SnapshotError::UnsupportedVersion(v) => write!(f, "Unsupported version: {}", v),
            SnapshotError::DimensionMismatch { expected, found } => write!(
                f,
                "snapshot is {}x{}, board is {}x{}",
                found.0, found.1, expected.0, expected.1
            ),
        }
    }
}

impl std::error::Error for SnapshotError {}

impl From<std::io::Error> for SnapshotError {
    fn from(e: std::io::Error) -> Self {
        SnapshotError::Io(e)
    }
}

impl From<bincode::Error> for SnapshotError {
    fn from(e: bincode::Error) -> Self {
        SnapshotError::Bincode(e)
    }
}

impl From<serde_json::Error> for SnapshotError {
    fn from(e: serde_json::Error) -> Self {
        SnapshotError::Json(e.to_string())
    }
}

/// Result type for board I/O operations.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Saved contents of one cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellSnapshot {
    pub particle: String,
    pub write_count: u64,
    #[serde(default)]
    pub outgoing: BTreeMap<String, Point>,
    #[serde(default)]
    pub incoming: BTreeMap<String, Point>,
}

/// Saved contents of a board, cells in row-major order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub width: usize,
    pub height: usize,
    pub topology: Topology,
    pub cells: Vec<CellSnapshot>,
}

fn is_json(path: &Path) -> bool {
    path.to_string_lossy().to_lowercase().ends_with(".json")
}

/// Save a board. Format is determined by file extension.
pub fn save_board<P: AsRef<Path>>(board: &Board, path: P) -> SnapshotResult<()> {
    let path = path.as_ref();
    let snapshot = board.snapshot();
    if is_json(path) {
        save_snapshot_json(&snapshot, path)?;
    } else {
        save_snapshot_binary(&snapshot, path)?;
    }
    info!("saved {}x{} board to {}", snapshot.width, snapshot.height, path.display());
    Ok(())
}

/// Load a file into a board of the same size. Format is determined by file
/// extension.
pub fn load_board<P: AsRef<Path>>(board: &mut Board, path: P) -> SnapshotResult<()> {
    let path = path.as_ref();
    let snapshot = if is_json(path) {
        load_snapshot_json(path)?
    } else {
        load_snapshot_binary(path)?
    };
    board.restore(&snapshot)?;
    info!("loaded {}x{} board from {}", snapshot.width, snapshot.height, path.display());
    Ok(())
}

/// Save a snapshot in binary format.
pub fn save_snapshot_binary<P: AsRef<Path>>(snapshot: &BoardSnapshot, path: P) -> SnapshotResult<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    writer.write_all(MAGIC)?;
    writer.write_all(&VERSION.to_le_bytes())?;

    let data = bincode::serialize(snapshot)?;
    writer.write_all(&(data.len() as u64).to_le_bytes())?;
    writer.write_all(&data)?;

    writer.flush()?;
    Ok(())
}

/// Load a snapshot from binary format.
pub fn load_snapshot_binary<P: AsRef<Path>>(path: P) -> SnapshotResult<BoardSnapshot> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(SnapshotError::InvalidFormat(
            "Invalid magic bytes - not a board file".to_string(),
        ));
    }

    let mut version_bytes = [0u8; 4];
    reader.read_exact(&mut version_bytes)?;
    let version = u32::from_le_bytes(version_bytes);
    if version > VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }

    let mut size_bytes = [0u8; 8];
    reader.read_exact(&mut size_bytes)?;
    let size = u64::from_le_bytes(size_bytes);
    let header_len = (MAGIC.len() + version_bytes.len() + size_bytes.len()) as u64;
    if size > file_len.saturating_sub(header_len) {
        return Err(SnapshotError::InvalidFormat(format!(
            "payload of {} bytes runs past the end of the file",
            size
        )));
    }

    let options = bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_limit(size);
    Ok(options.deserialize_from(reader.take(size))?)
}

/// Save a snapshot in JSON format.
pub fn save_snapshot_json<P: AsRef<Path>>(snapshot: &BoardSnapshot, path: P) -> SnapshotResult<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, snapshot)?;
    Ok(())
}

/// Load a snapshot from JSON format.
pub fn load_snapshot_json<P: AsRef<Path>>(path: P) -> SnapshotResult<BoardSnapshot> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}
