//! TOML configuration file parsing

use super::*;
use crate::config::cli::Cli;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config = ::toml::from_str(contents).context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Load the configuration file named on the command line, or the defaults
pub fn load_config(cli: &Cli) -> Result<Config> {
    let config = match &cli.config {
        Some(path) => parse_toml_file(path)?,
        None => Config::default(),
    };
    merge_cli_with_config(cli, config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: Config) -> Result<Config> {
    // Broker settings
    if let Some(port) = cli.worker_port {
        config.broker.worker_port = port;
    }
    if let Some(ref host_list) = cli.host_list {
        config.broker.workers = parse_host_list(host_list);
    } else if let Some(ref clients_file) = cli.clients_file {
        config.broker.workers = read_clients_file(clients_file)?;
    }
    if let Some(ms) = cli.band_timeout_ms {
        config.broker.band_timeout_ms = ms;
    }
    if let Some(ms) = cli.connect_timeout_ms {
        config.broker.connect_timeout_ms = ms;
    }

    // Worker settings
    if let Some(threads) = cli.compute_threads {
        config.worker.compute_threads = threads;
    }

    // --listen-port applies to whichever service is being started
    if let Some(port) = cli.listen_port {
        match cli.mode {
            cli::ExecutionMode::Broker => config.broker.listen_port = port,
            cli::ExecutionMode::Worker => config.worker.listen_port = port,
            cli::ExecutionMode::Client => {}
        }
    }

    // Client settings
    let client = &mut config.client;
    if let Some(ref broker) = cli.broker {
        client.broker = broker.clone();
    }
    if let Some(width) = cli.width {
        client.width = width;
    }
    if let Some(height) = cli.height {
        client.height = height;
    }
    if let Some(turns) = cli.turns {
        client.turns = turns;
    }
    if let Some(threads) = cli.threads {
        client.threads = threads;
    }
    if let Some(ref dir) = cli.images_dir {
        client.images_dir = dir.clone();
    }
    if let Some(ref dir) = cli.out_dir {
        client.out_dir = dir.clone();
    }
    if let Some(seed) = cli.seed {
        client.seed = seed;
    }
    if let Some(density) = cli.density {
        client.density = density;
    }
    if let Some(ms) = cli.tick_ms {
        client.tick_ms = ms;
    }
    if let Some(ref path) = cli.json_output {
        client.json_output = Some(path.clone());
    }

    Ok(config)
}

/// Parse a comma-separated worker list
pub fn parse_host_list(host_list: &str) -> Vec<String> {
    host_list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read worker addresses from a file (one per line, `#` comments allowed)
pub fn read_clients_file(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read clients file: {}", path.display()))?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
