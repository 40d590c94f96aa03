//! Lifebroker - distributed Game of Life
//!
//! A broker owns the board and advances it one generation per round, splitting each
//! generation into horizontal row bands computed in parallel by stateless workers.
//! A client submits a run and steers it while it executes.
//!
//! # Architecture
//!
//! - **Grid + kernel**: toroidal board, life rule, band partitioning (`grid`, `worker`)
//! - **Broker**: generation loop and control plane (pause, resume, reset, snapshot,
//!   alive count, shutdown) over TCP (`distributed::coordinator`)
//! - **Workers**: band computation service (`distributed::node_service`)
//! - **Client**: run submission, ticker and key commands (`driver`)

pub mod config;
pub mod distributed;
pub mod driver;
pub mod grid;
pub mod output;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use grid::{Cell, Grid, RowBand};

/// Result type used throughout Lifebroker
pub type Result<T> = anyhow::Result<T>;
