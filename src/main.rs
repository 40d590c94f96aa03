//! Lifebroker CLI entry point

use anyhow::{Context, Result};
use lifebroker::config::cli::{Cli, ExecutionMode};
use lifebroker::config::{toml, validator, ClientConfig, Config};
use lifebroker::distributed::{BrokerService, Coordinator, NodeService, RemoteDispatcher};
use lifebroker::driver::{Driver, Params};
use lifebroker::grid::Grid;
use lifebroker::output::{json, pgm, text};
use std::io::BufRead;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli.validate()?;

    init_logging(cli.debug);

    let config = toml::load_config(&cli)?;

    // Handle different execution modes
    match cli.mode {
        ExecutionMode::Broker => run_broker(config),
        ExecutionMode::Worker => run_worker(config),
        ExecutionMode::Client => run_client(config),
    }
}

/// Structured logs go to stderr; stdout is kept for user-facing output
fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("Failed to create tokio runtime")
}

/// Run in broker mode
fn run_broker(config: Config) -> Result<()> {
    validator::validate_broker(&config.broker).context("Configuration validation failed")?;

    let broker = config.broker;
    let workers = broker.worker_addresses();

    println!("Lifebroker v{} - broker", env!("CARGO_PKG_VERSION"));
    println!("Listening on port {}", broker.listen_port);
    println!("Workers ({}):", workers.len());
    for (i, addr) in workers.iter().enumerate() {
        println!("  [{}] {}", i, addr);
    }
    println!();

    runtime()?.block_on(async {
        let dispatcher = RemoteDispatcher::new(workers, broker.connect_timeout(), broker.band_timeout());
        let coordinator = Coordinator::new(dispatcher).context("Failed to create broker")?;
        let service = BrokerService::bind(&format!("0.0.0.0:{}", broker.listen_port), coordinator).await?;

        service.run().await?;
        println!("Broker shut down");
        Ok(())
    })
}

/// Run in worker mode
fn run_worker(config: Config) -> Result<()> {
    let worker = config.worker;

    if worker.compute_threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(worker.compute_threads)
            .build_global()
            .context("Failed to configure compute threads")?;
    }

    println!("Lifebroker v{} - worker", env!("CARGO_PKG_VERSION"));

    runtime()?.block_on(async {
        let service = NodeService::bind(&format!("0.0.0.0:{}", worker.listen_port)).await?;
        println!("Node ID: {}", service.node_id());
        println!("Listening on port {}", worker.listen_port);

        service.run().await?;
        println!("Worker shut down");
        Ok(())
    })
}

/// Run in client mode
fn run_client(config: Config) -> Result<()> {
    let client = config.client;
    validator::validate_client(&client).context("Configuration validation failed")?;

    let initial = load_initial_grid(&client)?;
    let params = Params {
        broker: client.broker.clone(),
        width: client.width,
        height: client.height,
        turns: client.turns,
        threads: client.threads,
        tick: client.tick(),
    };

    text::print_banner(&params);
    println!("Keys: s = snapshot, p = pause/resume, q = quit, k = shut down broker");
    println!();

    runtime()?.block_on(async {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let printer = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                text::print_event(&event);
            }
        });

        let (key_tx, key_rx) = mpsc::channel(16);
        spawn_key_reader(key_tx);

        let driver = Driver::new(params.clone(), pgm::PgmSink::new(&client.out_dir), event_tx);
        let report = driver.run(initial, key_rx).await;

        // Closing the event channel ends the printer once it has drained
        drop(driver);
        let _ = printer.await;

        let report = report?;
        text::print_summary(&report);

        if let Some(path) = &client.json_output {
            json::write_json_output(path, &json::build_run_summary(&params, &report), true)?;
            println!("JSON summary: {}", path.display());
        }

        Ok(())
    })
}

/// Input image if one exists for this board size, otherwise a seeded random board
fn load_initial_grid(client: &ClientConfig) -> Result<Grid> {
    let path = pgm::input_path(&client.images_dir, client.width, client.height);
    if path.exists() {
        let grid = pgm::read_pgm(&path)?;
        if grid.width() != client.width || grid.height() != client.height {
            anyhow::bail!(
                "{} is {}x{}, expected {}x{}",
                path.display(),
                grid.width(),
                grid.height(),
                client.width,
                client.height
            );
        }
        println!("Loaded {}", path.display());
        return Ok(grid);
    }

    println!(
        "No image at {}; using a random board (seed {}, density {})",
        path.display(),
        client.seed,
        client.density
    );
    Ok(Grid::random(client.width, client.height, client.density, client.seed)?)
}

/// Feed key presses from stdin, one line at a time
///
/// Runs on a plain thread so a blocked read never holds up runtime shutdown.
fn spawn_key_reader(keys: mpsc::Sender<char>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            for key in line.chars().filter(|c| !c.is_whitespace()) {
                if keys.blocking_send(key).is_err() {
                    return;
                }
            }
        }
    });
}
