//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.
//!
//! Every field has a default, so an empty TOML file (or none at all) is a valid
//! configuration. CLI flags override file values.

pub mod cli;
pub mod toml;
pub mod validator;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Complete configuration for all three roles
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

/// Broker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Port the broker listens on
    pub listen_port: u16,
    /// Worker addresses; entries without a port get `worker_port`
    pub workers: Vec<String>,
    /// Port used for worker entries that do not name one
    pub worker_port: u16,
    /// Deadline for one band round trip (milliseconds)
    pub band_timeout_ms: u64,
    /// Deadline for connecting to a worker (milliseconds)
    pub connect_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen_port: default_broker_port(),
            workers: Vec::new(),
            worker_port: default_worker_port(),
            band_timeout_ms: 30_000,
            connect_timeout_ms: 5_000,
        }
    }
}

impl BrokerConfig {
    pub fn band_timeout(&self) -> Duration {
        Duration::from_millis(self.band_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Worker roster with default ports filled in
    pub fn worker_addresses(&self) -> Vec<String> {
        self.workers
            .iter()
            .map(|addr| with_default_port(addr, self.worker_port))
            .collect()
    }
}

/// Worker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Port the worker listens on
    pub listen_port: u16,
    /// Threads for band computation (rayon); 0 uses one per core
    pub compute_threads: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            listen_port: default_worker_port(),
            compute_threads: 0,
        }
    }
}

/// Client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Broker address (IP:port)
    pub broker: String,
    pub width: usize,
    pub height: usize,
    pub turns: u64,
    /// Workers to split each generation across
    pub threads: usize,
    /// Directory holding `{width}x{height}.pgm` input images
    pub images_dir: PathBuf,
    /// Directory snapshots are written to
    pub out_dir: PathBuf,
    /// Seed for the random board used when no input image exists
    pub seed: u64,
    /// Fraction of live cells in a random board
    pub density: f64,
    /// Interval between live-cell polls (milliseconds)
    pub tick_ms: u64,
    /// Write a JSON run summary here
    pub json_output: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            broker: format!("127.0.0.1:{}", default_broker_port()),
            width: 512,
            height: 512,
            turns: 100,
            threads: 1,
            images_dir: PathBuf::from("images"),
            out_dir: PathBuf::from("out"),
            seed: 0,
            density: 0.25,
            tick_ms: 2_000,
            json_output: None,
        }
    }
}

impl ClientConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

fn default_broker_port() -> u16 {
    8030
}

fn default_worker_port() -> u16 {
    8000
}

/// Append `port` to `addr` unless it already names one
pub fn with_default_port(addr: &str, port: u16) -> String {
    let addr = addr.trim();
    if addr.contains(':') {
        addr.to_string()
    } else {
        format!("{}:{}", addr, port)
    }
}
