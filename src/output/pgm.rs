//! PGM image input and snapshot output
//!
//! Grids are stored as binary PGM (P5) images with a maxval of 255: a 255 byte is a
//! live cell, anything else is dead.
//!
//! Naming:
//! - input images are `{width}x{height}.pgm` inside the images directory
//! - snapshots are `{height}x{width}x{turn}.pgm` inside the output directory

use crate::grid::{Grid, ALIVE, DEAD};
use crate::Result;
use anyhow::Context;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Where snapshots go
pub trait SnapshotSink: Send + Sync {
    /// Persist `grid` as the state after `turn` and return the snapshot's name
    fn write_snapshot(&self, grid: &Grid, turn: u64) -> Result<String>;
}

/// Snapshot name for `grid` at `turn`
pub fn snapshot_name(grid: &Grid, turn: u64) -> String {
    format!("{}x{}x{}", grid.height(), grid.width(), turn)
}

/// Path of the input image for a `width x height` board
pub fn input_path(images_dir: &Path, width: usize, height: usize) -> PathBuf {
    images_dir.join(format!("{}x{}.pgm", width, height))
}

/// Writes snapshots as PGM files into a directory
#[derive(Debug, Clone)]
pub struct PgmSink {
    out_dir: PathBuf,
}

impl PgmSink {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self { out_dir: out_dir.into() }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }
}

impl SnapshotSink for PgmSink {
    fn write_snapshot(&self, grid: &Grid, turn: u64) -> Result<String> {
        fs::create_dir_all(&self.out_dir)
            .with_context(|| format!("Failed to create output directory: {}", self.out_dir.display()))?;

        let name = snapshot_name(grid, turn);
        write_pgm(&self.out_dir.join(format!("{}.pgm", name)), grid)?;
        Ok(name)
    }
}

/// Keeps snapshots in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    snapshots: Mutex<Vec<(String, Grid)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names and grids written so far, oldest first
    pub fn snapshots(&self) -> Vec<(String, Grid)> {
        self.snapshots.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl SnapshotSink for MemorySink {
    fn write_snapshot(&self, grid: &Grid, turn: u64) -> Result<String> {
        let name = snapshot_name(grid, turn);
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name.clone(), grid.clone()));
        Ok(name)
    }
}

/// Write `grid` as a binary PGM image
pub fn write_pgm(path: &Path, grid: &Grid) -> Result<()> {
    let mut file = fs::File::create(path)
        .with_context(|| format!("Failed to create image: {}", path.display()))?;

    write!(file, "P5\n{} {}\n255\n", grid.width(), grid.height())?;
    file.write_all(grid.cells())
        .with_context(|| format!("Failed to write image: {}", path.display()))?;

    Ok(())
}

/// Read a binary PGM image into a grid
pub fn read_pgm(path: &Path) -> Result<Grid> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read image: {}", path.display()))?;
    parse_pgm(&bytes).with_context(|| format!("Invalid PGM image: {}", path.display()))
}

/// Parse binary PGM bytes into a grid
pub fn parse_pgm(bytes: &[u8]) -> Result<Grid> {
    let mut pos = 0;

    let magic = next_token(bytes, &mut pos)?;
    if magic != b"P5" {
        anyhow::bail!("Unsupported PGM magic {:?}, expected P5", String::from_utf8_lossy(magic));
    }
    let width = parse_number(next_token(bytes, &mut pos)?, "width")?;
    let height = parse_number(next_token(bytes, &mut pos)?, "height")?;
    let maxval = parse_number(next_token(bytes, &mut pos)?, "maxval")?;
    if maxval != 255 {
        anyhow::bail!("Unsupported maxval {}, expected 255", maxval);
    }

    // Exactly one whitespace byte separates the header from the pixels
    pos += 1;

    let pixels = bytes.get(pos..).unwrap_or_default();
    let expected = width
        .checked_mul(height)
        .with_context(|| format!("Image dimensions {}x{} are too large", width, height))?;
    if pixels.len() < expected {
        anyhow::bail!("Image has {} pixels, expected {}", pixels.len(), expected);
    }

    let cells = pixels[..expected]
        .iter()
        .map(|&p| if p == ALIVE { ALIVE } else { DEAD })
        .collect();

    Ok(Grid::from_cells(width, height, cells)?)
}

/// Next whitespace-separated header token, skipping `#` comments
fn next_token<'a>(bytes: &'a [u8], pos: &mut usize) -> Result<&'a [u8]> {
    loop {
        while *pos < bytes.len() && bytes[*pos].is_ascii_whitespace() {
            *pos += 1;
        }
        if *pos < bytes.len() && bytes[*pos] == b'#' {
            while *pos < bytes.len() && bytes[*pos] != b'\n' {
                *pos += 1;
            }
            continue;
        }
        break;
    }

    let start = *pos;
    while *pos < bytes.len() && !bytes[*pos].is_ascii_whitespace() {
        *pos += 1;
    }
    if start == *pos {
        anyhow::bail!("Truncated PGM header");
    }
    Ok(&bytes[start..*pos])
}

fn parse_number(token: &[u8], field: &str) -> Result<usize> {
    std::str::from_utf8(token)
        .ok()
        .and_then(|s| s.parse().ok())
        .with_context(|| format!("Invalid PGM {}: {:?}", field, String::from_utf8_lossy(token)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Cell;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_name_is_height_width_turn() {
        let grid = Grid::new(16, 8).unwrap();
        assert_eq!(snapshot_name(&grid, 42), "8x16x42");
    }

    #[test]
    fn test_input_path() {
        assert_eq!(input_path(Path::new("images"), 64, 32), PathBuf::from("images/64x32.pgm"));
    }

    #[test]
    fn test_write_then_read_pgm() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("board.pgm");
        let grid = Grid::with_alive(5, 3, &[Cell::new(0, 0), Cell::new(4, 2), Cell::new(2, 1)]).unwrap();

        write_pgm(&path, &grid).unwrap();
        let bytes = fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"P5\n5 3\n255\n"));
        assert_eq!(bytes.len(), "P5\n5 3\n255\n".len() + 15);

        assert_eq!(read_pgm(&path).unwrap(), grid);
    }

    #[test]
    fn test_parse_pgm_with_comments() {
        let mut bytes = b"P5\n# made by hand\n2 2\n255\n".to_vec();
        bytes.extend_from_slice(&[255, 0, 7, 255]);

        let grid = parse_pgm(&bytes).unwrap();
        assert_eq!(grid.alive_cells(), vec![Cell::new(0, 0), Cell::new(1, 1)]);
        // Non-255 bytes are dead
        assert_eq!(grid.get(0, 1), DEAD);
    }

    #[test]
    fn test_parse_pgm_rejects_bad_input() {
        assert!(parse_pgm(b"P2\n2 2\n255\n").is_err());
        assert!(parse_pgm(b"P5\n2 2\n15\n\0\0\0\0").is_err());
        assert!(parse_pgm(b"P5\n2 2\n255\n\0").is_err());
        assert!(parse_pgm(b"P5\n2").is_err());
    }

    #[test]
    fn test_parse_pgm_rejects_overflowing_dimensions() {
        // 2^32 x 2^32 wraps to zero pixels on 64-bit targets
        assert!(parse_pgm(b"P5\n4294967296 4294967296\n255\n").is_err());

        let header = format!("P5\n{} 2\n255\n", usize::MAX);
        let err = parse_pgm(header.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("too large"), "{:#}", err);
    }

    #[test]
    fn test_pgm_sink_creates_named_file() {
        let dir = TempDir::new().unwrap();
        let sink = PgmSink::new(dir.path().join("out"));
        let grid = Grid::with_alive(4, 2, &[Cell::new(1, 1)]).unwrap();

        let name = sink.write_snapshot(&grid, 7).unwrap();
        assert_eq!(name, "2x4x7");
        assert_eq!(read_pgm(&dir.path().join("out/2x4x7.pgm")).unwrap(), grid);
    }

    #[test]
    fn test_memory_sink_records_snapshots() {
        let sink = MemorySink::new();
        let grid = Grid::new(3, 3).unwrap();
        sink.write_snapshot(&grid, 1).unwrap();
        sink.write_snapshot(&grid, 2).unwrap();

        let names: Vec<String> = sink.snapshots().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["3x3x1", "3x3x2"]);
    }
}
