//! CLI argument parsing using clap

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionMode {
    /// Broker mode - own the grid, drive the workers, serve clients
    Broker,
    /// Worker mode - compute bands for the broker
    Worker,
    /// Client mode (default) - submit a run and control it from the keyboard
    Client,
}

/// Lifebroker - distributed Game of Life
#[derive(Parser, Debug)]
#[command(name = "lifebroker")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Execution mode: broker, worker, or client
    #[arg(long, value_enum, default_value = "client")]
    pub mode: ExecutionMode,

    /// TOML configuration file (CLI flags take precedence)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    // === Broker / Worker ===
    /// Port to listen on (broker: 8030, worker: 8000)
    #[arg(long)]
    pub listen_port: Option<u16>,

    /// Comma-separated list of worker addresses for broker mode (e.g., "10.0.1.10:8000,10.0.1.11")
    #[arg(long)]
    pub host_list: Option<String>,

    /// File containing list of worker addresses (one per line, for broker mode)
    #[arg(long)]
    pub clients_file: Option<PathBuf>,

    /// Port used for worker addresses that do not name one (broker mode only)
    #[arg(long)]
    pub worker_port: Option<u16>,

    /// Deadline for one band round trip in milliseconds (broker mode only)
    #[arg(long)]
    pub band_timeout_ms: Option<u64>,

    /// Deadline for connecting to a worker in milliseconds (broker mode only)
    #[arg(long)]
    pub connect_timeout_ms: Option<u64>,

    /// Threads for band computation, 0 for one per core (worker mode only)
    #[arg(long)]
    pub compute_threads: Option<usize>,

    // === Client ===
    /// Broker address (client mode only)
    #[arg(short = 'B', long, env = "LIFEBROKER_BROKER")]
    pub broker: Option<String>,

    /// Board width
    #[arg(short = 'w', long)]
    pub width: Option<usize>,

    /// Board height
    #[arg(short = 'H', long)]
    pub height: Option<usize>,

    /// Generations to run
    #[arg(short = 'n', long)]
    pub turns: Option<u64>,

    /// Workers to split each generation across
    #[arg(short = 't', long)]
    pub threads: Option<usize>,

    /// Directory holding input images named {width}x{height}.pgm
    #[arg(long)]
    pub images_dir: Option<PathBuf>,

    /// Directory snapshots are written to
    #[arg(short = 'o', long)]
    pub out_dir: Option<PathBuf>,

    /// Seed for the random board used when no input image exists
    #[arg(long)]
    pub seed: Option<u64>,

    /// Fraction of live cells in a random board (0.0-1.0)
    #[arg(long)]
    pub density: Option<f64>,

    /// Interval between live-cell polls in milliseconds
    #[arg(long)]
    pub tick_ms: Option<u64>,

    /// Write a JSON run summary to this file
    #[arg(long)]
    pub json_output: Option<PathBuf>,

    // === Logging ===
    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate flag combinations that do not depend on the config file
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host_list.is_some() && self.clients_file.is_some() {
            anyhow::bail!("--host-list and --clients-file are mutually exclusive");
        }
        if self.mode != ExecutionMode::Broker && (self.host_list.is_some() || self.clients_file.is_some()) {
            anyhow::bail!("--host-list and --clients-file are only valid in broker mode");
        }
        Ok(())
    }
}
