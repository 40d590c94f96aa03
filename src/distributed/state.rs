//! Coordinator state
//!
//! One [`CoordinatorState`] owns everything the broker's concurrent handlers share.
//! The grid and the turn counter live together behind a single lock so a reader
//! never sees a grid from one generation paired with the turn of another.
//!
//! Grids are replaced wholesale each generation and never mutated in place, so
//! readers clone the `Arc` under the lock and serialize it afterwards.

use crate::distributed::control::{ControlState, PauseGate};
use crate::grid::Grid;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Grid and turn counter, always updated together
#[derive(Debug, Clone)]
pub struct GenerationState {
    pub grid: Arc<Grid>,
    pub turn: u64,
}

/// Shared broker state
#[derive(Debug)]
pub struct CoordinatorState {
    generation: Mutex<GenerationState>,

    /// Pause gate consulted at the top of every turn
    pub gate: PauseGate,

    /// Reset and shutdown flags
    pub control: ControlState,

    /// Held for the whole of one round (checkpoint, fan-out, fan-in, commit)
    ///
    /// Shutdown takes it so the flag is never observed mid-round.
    pub round_lock: tokio::sync::Mutex<()>,

    /// Serializes runs: one run owns the grid at a time
    pub run_lock: tokio::sync::Mutex<()>,
}

impl CoordinatorState {
    pub fn new() -> Self {
        Self {
            generation: Mutex::new(GenerationState {
                grid: Arc::new(Grid::empty()),
                turn: 0,
            }),
            gate: PauseGate::new(),
            control: ControlState::new(),
            round_lock: tokio::sync::Mutex::new(()),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn generation(&self) -> MutexGuard<'_, GenerationState> {
        // The critical sections never panic halfway through an update
        self.generation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install a fresh grid and restart the turn counter
    pub fn install(&self, grid: Grid) {
        let mut generation = self.generation();
        generation.grid = Arc::new(grid);
        generation.turn = 0;
    }

    /// Commit a completed generation
    pub fn advance(&self, grid: Grid) -> u64 {
        let mut generation = self.generation();
        generation.grid = Arc::new(grid);
        generation.turn += 1;
        generation.turn
    }

    /// Current `(turn, grid)` pair
    pub fn snapshot(&self) -> (u64, Arc<Grid>) {
        let generation = self.generation();
        (generation.turn, Arc::clone(&generation.grid))
    }

    pub fn turn(&self) -> u64 {
        self.generation().turn
    }

    /// Live cells inside the declared bounds, with the turn they were counted at
    pub fn alive_count(&self, width: usize, height: usize) -> (usize, u64) {
        let generation = self.generation();
        (generation.grid.alive_count_within(width, height), generation.turn)
    }
}

impl Default for CoordinatorState {
    fn default() -> Self {
        Self::new()
    }
}
