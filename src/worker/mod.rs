//! Worker compute kernel
//!
//! Pure next-generation computation for one band of rows. A worker receives the
//! whole pre-generation grid (so cells on the band boundary can see their neighbours
//! in adjacent bands) plus the band bounds, and returns a grid holding only the
//! band's rows.
//!
//! Neighbour lookups wrap around all four edges: the grid is a torus. The kernel
//! never mutates its input, so any number of bands can be computed concurrently
//! against the same grid.
//!
//! Rows inside a band are independent of each other and are computed in parallel
//! with rayon.

use crate::grid::{Grid, GridError, RowBand, ALIVE, DEAD};
use rayon::prelude::*;

/// Offsets of the eight neighbours of a cell
const NEIGHBOUR_OFFSETS: [(isize, isize); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Wrap `coord + delta` onto `[0, size)`
#[inline]
fn wrap(coord: usize, delta: isize, size: usize) -> usize {
    (coord as isize + delta).rem_euclid(size as isize) as usize
}

/// Count live cells among the eight toroidal neighbours of `(x, y)`
pub fn alive_neighbours(grid: &Grid, x: usize, y: usize) -> u8 {
    let width = grid.width();
    let height = grid.height();
    let mut sum = 0;

    for (dx, dy) in NEIGHBOUR_OFFSETS {
        let nx = wrap(x, dx, width);
        let ny = wrap(y, dy, height);
        if grid.get(nx, ny) == ALIVE {
            sum += 1;
        }
    }

    sum
}

/// Apply the life rule to one cell
///
/// A live cell survives with 2 or 3 live neighbours; a dead cell comes alive with
/// exactly 3. Everything else is dead next generation.
#[inline]
pub fn next_state(current: u8, neighbours: u8) -> u8 {
    match (current == ALIVE, neighbours) {
        (true, 2) | (true, 3) => ALIVE,
        (false, 3) => ALIVE,
        _ => DEAD,
    }
}

/// Compute the next generation of `band`
///
/// Returns a grid of `band.len()` rows and `grid.width()` columns, where row 0
/// corresponds to `band.start_y`.
///
/// # Errors
///
/// Returns [`GridError::BandOutOfRange`] when the band is empty or does not fit
/// inside the grid.
pub fn compute_band(grid: &Grid, band: RowBand) -> Result<Grid, GridError> {
    let width = grid.width();
    if band.is_empty() || band.end_y > grid.height() {
        return Err(GridError::BandOutOfRange {
            start_y: band.start_y,
            end_y: band.end_y,
            height: grid.height(),
        });
    }

    let mut cells = vec![DEAD; width * band.len()];
    cells
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(offset, row)| {
            let y = band.start_y + offset;
            for (x, cell) in row.iter_mut().enumerate() {
                *cell = next_state(grid.get(x, y), alive_neighbours(grid, x, y));
            }
        });

    Grid::from_cells(width, band.len(), cells)
}

/// Compute the next generation of the whole grid as a single band
pub fn step(grid: &Grid) -> Result<Grid, GridError> {
    compute_band(grid, RowBand::new(0, grid.height()))
}
