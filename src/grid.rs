//! Grid model
//!
//! The simulated world is a fixed-size toroidal grid of byte cells. A cell holding
//! [`ALIVE`] is alive, anything else is dead. Cells are stored row-major in one flat
//! buffer so a band of rows is a contiguous slice, which keeps band reassembly a
//! plain concatenation.
//!
//! Each generation the broker splits `[0, height)` into contiguous [`RowBand`]s, one per
//! worker. See [`partition`] for the exact division rule.

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Byte value of a live cell
pub const ALIVE: u8 = 255;

/// Byte value of a dead cell
pub const DEAD: u8 = 0;

/// Errors raised while building, slicing or partitioning grids
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("grid dimensions must be positive, got {width}x{height}")]
    EmptyDimensions { width: usize, height: usize },

    #[error("cell buffer holds {actual} bytes but {width}x{height} needs {expected}")]
    BufferSize {
        width: usize,
        height: usize,
        expected: usize,
        actual: usize,
    },

    #[error("grid dimensions {width}x{height} overflow the address space")]
    TooLarge { width: usize, height: usize },

    #[error("worker count must be at least 1")]
    ZeroWorkers,

    #[error("{workers} workers cannot share {height} rows (every band needs at least one row)")]
    TooManyWorkers { workers: usize, height: usize },

    #[error("band [{start_y}, {end_y}) is outside a grid of height {height}")]
    BandOutOfRange {
        start_y: usize,
        end_y: usize,
        height: usize,
    },

    #[error("cannot stack bands of width {actual} onto width {expected}")]
    WidthMismatch { expected: usize, actual: usize },
}

/// Coordinates of a single cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub x: usize,
    pub y: usize,
}

impl Cell {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

/// Half-open row range `[start_y, end_y)` computed by one worker for one generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowBand {
    pub start_y: usize,
    pub end_y: usize,
}

impl RowBand {
    pub fn new(start_y: usize, end_y: usize) -> Self {
        Self { start_y, end_y }
    }

    /// Number of rows in the band
    pub fn len(&self) -> usize {
        self.end_y.saturating_sub(self.start_y)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Split `[0, height)` into `worker_count` contiguous bands
///
/// Every band gets `height / worker_count` rows; the last band also absorbs the
/// remainder of the division. Bands are returned in ascending order and cover
/// `[0, height)` exactly once.
///
/// # Errors
///
/// Rejects zero workers, an empty grid, and more workers than rows.
pub fn partition(height: usize, worker_count: usize) -> Result<Vec<RowBand>, GridError> {
    if worker_count == 0 {
        return Err(GridError::ZeroWorkers);
    }
    if height == 0 {
        return Err(GridError::EmptyDimensions { width: 0, height });
    }
    if worker_count > height {
        return Err(GridError::TooManyWorkers {
            workers: worker_count,
            height,
        });
    }

    let divider = height / worker_count;
    let bands = (0..worker_count)
        .map(|i| {
            let start_y = i * divider;
            let end_y = if i == worker_count - 1 {
                height
            } else {
                (i + 1) * divider
            };
            RowBand::new(start_y, end_y)
        })
        .collect();

    Ok(bands)
}

/// Two-dimensional cell grid
///
/// A `Grid` with zero width or height is only used as the broker's placeholder before
/// the first run; [`Grid::new`] and [`Grid::from_cells`] refuse to build one.
///
/// Decoding goes through [`Grid::from_cells`], so a grid read off the wire always has
/// a buffer matching its dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawGrid")]
pub struct Grid {
    width: usize,
    height: usize,
    cells: Vec<u8>,
}

/// Unchecked wire shape of a [`Grid`]
#[derive(Deserialize)]
struct RawGrid {
    width: usize,
    height: usize,
    cells: Vec<u8>,
}

impl TryFrom<RawGrid> for Grid {
    type Error = GridError;

    fn try_from(raw: RawGrid) -> Result<Self, Self::Error> {
        if raw.width == 0 && raw.height == 0 && raw.cells.is_empty() {
            return Ok(Self::empty());
        }
        Self::from_cells(raw.width, raw.height, raw.cells)
    }
}

impl Grid {
    /// Create an all-dead grid
    pub fn new(width: usize, height: usize) -> Result<Self, GridError> {
        if width == 0 || height == 0 {
            return Err(GridError::EmptyDimensions { width, height });
        }
        let len = width
            .checked_mul(height)
            .ok_or(GridError::TooLarge { width, height })?;
        Ok(Self {
            width,
            height,
            cells: vec![DEAD; len],
        })
    }

    /// Placeholder grid with no cells
    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            cells: Vec::new(),
        }
    }

    /// Build a grid from a row-major cell buffer
    pub fn from_cells(width: usize, height: usize, cells: Vec<u8>) -> Result<Self, GridError> {
        if width == 0 || height == 0 {
            return Err(GridError::EmptyDimensions { width, height });
        }
        let expected = width
            .checked_mul(height)
            .ok_or(GridError::TooLarge { width, height })?;
        if cells.len() != expected {
            return Err(GridError::BufferSize {
                width,
                height,
                expected,
                actual: cells.len(),
            });
        }
        Ok(Self {
            width,
            height,
            cells,
        })
    }

    /// Build a grid where exactly the listed cells are alive
    ///
    /// Cells outside the grid are ignored.
    pub fn with_alive(width: usize, height: usize, alive: &[Cell]) -> Result<Self, GridError> {
        let mut grid = Self::new(width, height)?;
        for cell in alive {
            if cell.x < width && cell.y < height {
                grid.set(cell.x, cell.y, true);
            }
        }
        Ok(grid)
    }

    /// Seeded random grid where each cell is alive with probability `density`
    pub fn random(width: usize, height: usize, density: f64, seed: u64) -> Result<Self, GridError> {
        let mut grid = Self::new(width, height)?;
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let density = density.clamp(0.0, 1.0);
        for cell in grid.cells.iter_mut() {
            if rng.gen_bool(density) {
                *cell = ALIVE;
            }
        }
        Ok(grid)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Raw row-major cell bytes
    pub fn cells(&self) -> &[u8] {
        &self.cells
    }

    /// Cells of row `y`
    pub fn row(&self, y: usize) -> &[u8] {
        let start = y * self.width;
        &self.cells[start..start + self.width]
    }

    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.cells[y * self.width + x]
    }

    pub fn is_alive(&self, x: usize, y: usize) -> bool {
        self.get(x, y) == ALIVE
    }

    pub fn set(&mut self, x: usize, y: usize, alive: bool) {
        self.cells[y * self.width + x] = if alive { ALIVE } else { DEAD };
    }

    /// Number of live cells in the whole grid
    pub fn alive_count(&self) -> usize {
        self.cells.iter().filter(|&&c| c == ALIVE).count()
    }

    /// Number of live cells inside the declared `width x height` bounds
    ///
    /// Bounds larger than the grid are clamped to the grid.
    pub fn alive_count_within(&self, width: usize, height: usize) -> usize {
        let width = width.min(self.width);
        let height = height.min(self.height);
        (0..height)
            .map(|y| self.row(y)[..width].iter().filter(|&&c| c == ALIVE).count())
            .sum()
    }

    /// Coordinates of every live cell, in row-major order
    pub fn alive_cells(&self) -> Vec<Cell> {
        let mut alive = Vec::new();
        for y in 0..self.height {
            for (x, &c) in self.row(y).iter().enumerate() {
                if c == ALIVE {
                    alive.push(Cell::new(x, y));
                }
            }
        }
        alive
    }

    /// Stack bands vertically, first band on top
    ///
    /// Used to reassemble a generation from per-worker results in band-index order.
    pub fn stack<I>(bands: I) -> Result<Self, GridError>
    where
        I: IntoIterator<Item = Grid>,
    {
        let mut width = None;
        let mut height = 0;
        let mut cells = Vec::new();

        for band in bands {
            match width {
                None => width = Some(band.width),
                Some(w) if w != band.width => {
                    return Err(GridError::WidthMismatch {
                        expected: w,
                        actual: band.width,
                    })
                }
                Some(_) => {}
            }
            height += band.height;
            cells.extend_from_slice(&band.cells);
        }

        Self::from_cells(width.unwrap_or(0), height, cells)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_even_split() {
        let bands = partition(16, 4).unwrap();
        assert_eq!(
            bands,
            vec![
                RowBand::new(0, 4),
                RowBand::new(4, 8),
                RowBand::new(8, 12),
                RowBand::new(12, 16),
            ]
        );
    }

    #[test]
    fn test_partition_last_band_absorbs_remainder() {
        let bands = partition(10, 3).unwrap();
        assert_eq!(
            bands,
            vec![RowBand::new(0, 3), RowBand::new(3, 6), RowBand::new(6, 10)]
        );
    }

    #[test]
    fn test_partition_coverage_is_exact() {
        for height in 1..=40 {
            for workers in 1..=height {
                let bands = partition(height, workers).unwrap();
                assert_eq!(bands.len(), workers);
                assert_eq!(bands[0].start_y, 0);
                assert_eq!(bands[bands.len() - 1].end_y, height);
                for pair in bands.windows(2) {
                    // Contiguous and non-overlapping
                    assert_eq!(pair[0].end_y, pair[1].start_y);
                }
                let total: usize = bands.iter().map(RowBand::len).sum();
                assert_eq!(total, height);
                assert!(bands.iter().all(|b| !b.is_empty()));
            }
        }
    }

    #[test]
    fn test_partition_rejects_malformed_requests() {
        assert_eq!(partition(8, 0), Err(GridError::ZeroWorkers));
        assert!(matches!(partition(0, 1), Err(GridError::EmptyDimensions { .. })));
        assert_eq!(
            partition(3, 4),
            Err(GridError::TooManyWorkers { workers: 4, height: 3 })
        );
    }

    #[test]
    fn test_grid_rejects_bad_dimensions() {
        assert!(Grid::new(0, 5).is_err());
        assert!(Grid::new(5, 0).is_err());
        assert!(matches!(
            Grid::from_cells(2, 2, vec![0; 3]),
            Err(GridError::BufferSize { expected: 4, actual: 3, .. })
        ));
    }

    #[test]
    fn test_alive_cells_and_counts() {
        let alive = [Cell::new(0, 0), Cell::new(3, 1), Cell::new(2, 2)];
        let grid = Grid::with_alive(4, 3, &alive).unwrap();

        assert_eq!(grid.alive_count(), 3);
        assert_eq!(grid.alive_cells(), alive.to_vec());
        assert!(grid.is_alive(3, 1));
        assert!(!grid.is_alive(1, 1));

        // Declared bounds smaller than the grid only see part of it
        assert_eq!(grid.alive_count_within(2, 3), 1);
        // Oversized bounds are clamped
        assert_eq!(grid.alive_count_within(100, 100), 3);
    }

    #[test]
    fn test_stack_concatenates_in_order() {
        let top = Grid::with_alive(3, 1, &[Cell::new(0, 0)]).unwrap();
        let bottom = Grid::with_alive(3, 2, &[Cell::new(2, 1)]).unwrap();

        let grid = Grid::stack(vec![top, bottom]).unwrap();
        assert_eq!(grid.width(), 3);
        assert_eq!(grid.height(), 3);
        assert_eq!(grid.alive_cells(), vec![Cell::new(0, 0), Cell::new(2, 2)]);
    }

    #[test]
    fn test_stack_rejects_mixed_widths() {
        let a = Grid::new(3, 1).unwrap();
        let b = Grid::new(4, 1).unwrap();
        assert_eq!(
            Grid::stack(vec![a, b]),
            Err(GridError::WidthMismatch { expected: 3, actual: 4 })
        );
    }

    #[test]
    fn test_random_grid_is_seeded() {
        let a = Grid::random(32, 16, 0.3, 42).unwrap();
        let b = Grid::random(32, 16, 0.3, 42).unwrap();
        assert_eq!(a, b);
        assert!(a.alive_count() > 0);
        assert_eq!(Grid::random(8, 8, 0.0, 1).unwrap().alive_count(), 0);
        assert_eq!(Grid::random(8, 8, 1.0, 1).unwrap().alive_count(), 64);
    }

    #[test]
    fn test_from_cells_rejects_overflowing_dimensions() {
        let err = Grid::from_cells(usize::MAX, 2, vec![ALIVE; 2]).unwrap_err();
        assert_eq!(
            err,
            GridError::TooLarge {
                width: usize::MAX,
                height: 2
            }
        );
    }

    /// Same field layout as `Grid`, but free to carry any buffer
    #[derive(Serialize)]
    struct LooseGrid {
        width: usize,
        height: usize,
        cells: Vec<u8>,
    }

    #[test]
    fn test_decoding_checks_buffer_length() {
        let bytes = rmp_serde::to_vec(&LooseGrid {
            width: 8,
            height: 8,
            cells: vec![ALIVE; 10],
        })
        .unwrap();
        let err = rmp_serde::from_slice::<Grid>(&bytes).unwrap_err();
        assert!(err.to_string().contains("needs 64"), "{}", err);

        let bytes = rmp_serde::to_vec(&LooseGrid {
            width: usize::MAX,
            height: 2,
            cells: vec![ALIVE; 2],
        })
        .unwrap();
        assert!(rmp_serde::from_slice::<Grid>(&bytes).is_err());
    }

    #[test]
    fn test_decoding_round_trips_valid_and_placeholder_grids() {
        let grid = Grid::random(5, 3, 0.5, 11).unwrap();
        let decoded: Grid = rmp_serde::from_slice(&rmp_serde::to_vec(&grid).unwrap()).unwrap();
        assert_eq!(decoded, grid);

        let decoded: Grid = rmp_serde::from_slice(&rmp_serde::to_vec(&Grid::empty()).unwrap()).unwrap();
        assert!(decoded.is_empty());
    }
}
