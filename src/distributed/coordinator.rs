//! Broker
//!
//! This module implements the broker that owns the authoritative grid:
//! - Runs the generation loop: partition, fan out one band per worker, fan in,
//!   commit, repeat
//! - Serves the control plane (pause, resume, reset, snapshot, alive count) while a
//!   run is in flight
//! - Performs the terminal shutdown: broadcast to workers, then stop serving
//!
//! # Generation loop checkpoints
//!
//! ```text
//! for each turn:
//!     wait for the pause gate to be open (or for termination)
//!     take the round lock
//!         shutting down?  -> abort the run
//!         reset pending?  -> consume it, stop early
//!         fan out one COMPUTE_BAND per band, fan in all results
//!         commit grid + turn together
//!     release the round lock
//! ```
//!
//! A round is never interrupted: reset, pause and shutdown all take effect between
//! rounds, so the committed grid is always a whole generation.

use crate::distributed::dispatch::BandDispatcher;
use crate::distributed::error::BrokerError;
use crate::distributed::protocol::*;
use crate::distributed::state::CoordinatorState;
use crate::grid::{partition, Grid, RowBand};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Signal that triggers the broker's terminal shutdown
pub const SHUTDOWN_SIGNAL: char = 'k';

/// Result of a run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Grid after the last completed generation
    pub grid: Arc<Grid>,

    /// Generations completed in this run
    pub completed_turns: u64,

    /// Whether the run stopped early because of a reset
    pub reset: bool,
}

/// Broker core: shared state plus the dispatcher that reaches the workers
pub struct Coordinator<D> {
    state: Arc<CoordinatorState>,
    dispatcher: Arc<D>,
}

impl<D> Clone for Coordinator<D> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}

impl<D: BandDispatcher> Coordinator<D> {
    /// Create a broker over a fixed worker roster
    pub fn new(dispatcher: D) -> Result<Self> {
        if dispatcher.roster_size() == 0 {
            anyhow::bail!("No workers specified for the broker");
        }

        Ok(Self {
            state: Arc::new(CoordinatorState::new()),
            dispatcher: Arc::new(dispatcher),
        })
    }

    pub fn state(&self) -> &CoordinatorState {
        &self.state
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    fn ensure_running(&self) -> Result<(), BrokerError> {
        if self.state.control.is_shutting_down() {
            return Err(BrokerError::ShuttingDown);
        }
        Ok(())
    }

    /// Evolve `grid` for `turns` generations across `worker_count` workers
    ///
    /// Installs the grid and restarts the turn counter before the first turn. Runs
    /// are serialized: a second call waits for the active run to finish.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for empty grids, zero workers, more workers than the roster
    ///   or than rows
    /// - `Transport` / `Timeout` when a worker fails; the grid keeps the last whole
    ///   generation
    /// - `ShuttingDown` when the broker begins its terminal shutdown mid-run
    pub async fn run_generations(
        &self,
        grid: Grid,
        turns: u64,
        worker_count: usize,
    ) -> Result<RunOutcome, BrokerError> {
        self.ensure_running()?;

        let roster = self.dispatcher.roster_size();
        if worker_count > roster {
            return Err(BrokerError::InvalidRequest(format!(
                "{} workers requested but the roster has {}",
                worker_count, roster
            )));
        }
        if grid.is_empty() {
            return Err(BrokerError::InvalidRequest("grid has no cells".to_string()));
        }
        let bands = partition(grid.height(), worker_count)?;

        let _run = self.state.run_lock.lock().await;
        self.ensure_running()?;

        info!(
            width = grid.width(),
            height = grid.height(),
            turns,
            workers = worker_count,
            "run started"
        );

        let started = Instant::now();
        self.state.install(grid);
        // A reset aimed at an earlier run must not cut this one short
        self.state.control.clear_reset();

        let mut reset = false;
        for t in 0..turns {
            // A pause that lands after shutdown released the gate must not strand the loop
            tokio::select! {
                _ = self.state.gate.wait_open() => {}
                _ = self.state.control.wait_terminated() => {}
            }

            let _round = self.state.round_lock.lock().await;

            if self.state.control.is_shutting_down() {
                warn!(turn = t, "run aborted by shutdown");
                return Err(BrokerError::ShuttingDown);
            }
            if self.state.control.take_reset() {
                info!(turn = t, "run reset");
                reset = true;
                break;
            }

            let (_, current) = self.state.snapshot();
            let next = self.compute_generation(&current, &bands).await.map_err(|e| {
                error!(turn = t, error = %e, "generation failed");
                e
            })?;
            let turn = self.state.advance(next);

            debug!(turn, "generation complete");
        }

        let (completed_turns, grid) = self.state.snapshot();
        info!(
            completed_turns,
            requested = turns,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "run finished"
        );

        Ok(RunOutcome {
            grid,
            completed_turns,
            reset,
        })
    }

    /// One round: scatter bands to workers, gather them back in band order
    async fn compute_generation(&self, current: &Arc<Grid>, bands: &[RowBand]) -> Result<Grid, BrokerError> {
        let mut tasks = JoinSet::new();

        // Fan out: every request is in flight before any is awaited
        for (index, band) in bands.iter().enumerate() {
            let request = ComputeBandRequest {
                grid: Arc::clone(current),
                width: current.width(),
                height: current.height(),
                start_y: band.start_y,
                end_y: band.end_y,
            };
            let dispatcher = Arc::clone(&self.dispatcher);
            tasks.spawn(async move { (index, dispatcher.compute_band(index, request).await) });
        }

        // Fan in: completion order is irrelevant, slots are filled by band index
        let mut results: Vec<Option<Grid>> = vec![None; bands.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, result) =
                joined.map_err(|e| BrokerError::Protocol(format!("band task failed: {}", e)))?;
            match result {
                Ok(band) => results[index] = Some(band),
                Err(e) => {
                    // First error wins; dropping the set aborts the other bands
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }

        let parts = results
            .into_iter()
            .enumerate()
            .map(|(index, band)| {
                band.ok_or_else(|| BrokerError::Protocol(format!("band {} never returned", index)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Grid::stack(parts)?)
    }

    /// Close the pause gate; the loop stops before its next turn
    pub fn pause(&self) -> Result<u64, BrokerError> {
        self.ensure_running()?;
        self.state.gate.close()?;
        let turn = self.state.turn();
        info!(turn, "paused");
        Ok(turn)
    }

    /// Open the pause gate
    pub fn resume(&self) -> Result<u64, BrokerError> {
        self.ensure_running()?;
        self.state.gate.open()?;
        let turn = self.state.turn();
        info!(turn, "resumed");
        Ok(turn)
    }

    /// Ask the active run to stop at its next checkpoint
    ///
    /// Returns the turn observed now, not the turn the run ends on. A paused run is
    /// released so it can reach the checkpoint.
    pub fn reset(&self) -> Result<u64, BrokerError> {
        self.ensure_running()?;
        self.state.control.request_reset();
        let turn = self.state.turn();
        if self.state.gate.force_open() {
            debug!("reset released a paused run");
        }
        info!(turn, "reset requested");
        Ok(turn)
    }

    /// Current `(turn, grid)` pair
    pub fn snapshot(&self) -> Result<(u64, Arc<Grid>), BrokerError> {
        self.ensure_running()?;
        Ok(self.state.snapshot())
    }

    /// Live cells within the declared bounds and the current turn
    pub fn alive_count(&self, width: usize, height: usize) -> Result<(usize, u64), BrokerError> {
        self.ensure_running()?;
        Ok(self.state.alive_count(width, height))
    }

    /// Terminal shutdown
    ///
    /// Any signal other than [`SHUTDOWN_SIGNAL`] is ignored and returns `false`.
    /// Otherwise the one-way flag is set, the in-flight round (if any) is allowed to
    /// finish, every worker is asked to terminate, and the service loop is told to
    /// stop. Returns `true` once the transition is complete.
    pub async fn shutdown(&self, signal: char) -> Result<bool, BrokerError> {
        self.ensure_running()?;
        if signal != SHUTDOWN_SIGNAL {
            debug!(%signal, "ignoring shutdown signal");
            return Ok(false);
        }
        if !self.state.control.begin_shutdown() {
            return Err(BrokerError::ShuttingDown);
        }

        info!("shutting down");

        // Release a paused run so it can observe the flag and unwind
        self.state.gate.force_open();

        {
            // Wait out the in-flight round; the flag is then seen at the next checkpoint
            let _round = self.state.round_lock.lock().await;
            let acknowledged = self.dispatcher.shutdown_workers().await;
            info!(
                acknowledged,
                roster = self.dispatcher.roster_size(),
                "worker shutdown broadcast complete"
            );
        }

        self.state.control.mark_terminated();
        Ok(true)
    }

    pub fn is_terminated(&self) -> bool {
        self.state.control.is_terminated()
    }

    /// Route one request to its operation and build the reply
    pub async fn handle_message(&self, msg: Message) -> Message {
        let result = match msg {
            Message::RunGenerations(req) => self.handle_run(req).await,
            Message::AliveCount(req) => self
                .alive_count(req.width, req.height)
                .map(|(alive_count, turn)| Message::AliveCountReply(AliveCountResponse { alive_count, turn })),
            Message::Snapshot => self
                .snapshot()
                .map(|(turn, grid)| Message::SnapshotReply(SnapshotResponse { turn, grid })),
            Message::Pause => self.pause().map(|_| Message::Ack),
            Message::Resume => self.resume().map(|_| Message::Ack),
            Message::Reset => self.reset().map(|turn| Message::ResetReply(ResetResponse { turn })),
            Message::BrokerShutdown(req) => self.shutdown(req.signal).await.map(|_| Message::Ack),
            other => Err(BrokerError::Protocol(format!(
                "broker does not handle {}",
                other.name()
            ))),
        };

        result.unwrap_or_else(|e| Message::Error(e.to_message()))
    }

    async fn handle_run(&self, req: RunGenerationsRequest) -> Result<Message, BrokerError> {
        if req.protocol_version != PROTOCOL_VERSION {
            return Err(BrokerError::InvalidRequest(format!(
                "protocol version mismatch: client={}, broker={}",
                req.protocol_version, PROTOCOL_VERSION
            )));
        }
        if req.width == 0 || req.height == 0 {
            return Err(BrokerError::InvalidRequest(format!(
                "grid dimensions must be positive, got {}x{}",
                req.width, req.height
            )));
        }
        if req.grid.width() != req.width || req.grid.height() != req.height {
            return Err(BrokerError::InvalidRequest(format!(
                "grid is {}x{} but {}x{} was declared",
                req.grid.width(),
                req.grid.height(),
                req.width,
                req.height
            )));
        }

        let outcome = self.run_generations(req.grid, req.turns, req.worker_count).await?;
        Ok(Message::RunComplete(RunCompleteResponse {
            grid: outcome.grid,
            completed_turns: outcome.completed_turns,
        }))
    }
}

/// TCP front end of the broker
pub struct BrokerService<D> {
    listener: TcpListener,
    coordinator: Coordinator<D>,
}

impl<D: BandDispatcher> BrokerService<D> {
    /// Bind the broker's listening socket
    pub async fn bind(addr: &str, coordinator: Coordinator<D>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind broker on {}", addr))?;

        Ok(Self { listener, coordinator })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("Failed to read broker address")
    }

    pub fn coordinator(&self) -> &Coordinator<D> {
        &self.coordinator
    }

    /// Serve clients until the terminal shutdown completes
    pub async fn run(self) -> Result<()> {
        info!(addr = %self.local_addr()?, workers = self.coordinator.dispatcher.roster_size(), "broker listening");

        let state = Arc::clone(&self.coordinator.state);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted.context("Failed to accept connection")?;
                    debug!(%peer, "client connected");

                    let coordinator = self.coordinator.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(coordinator, stream).await {
                            warn!(%peer, error = %format!("{:#}", e), "connection failed");
                        }
                    });
                }
                _ = state.control.wait_terminated() => {
                    info!("broker terminated");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Serve requests on one client connection until it closes
async fn handle_connection<D: BandDispatcher>(coordinator: Coordinator<D>, mut stream: TcpStream) -> Result<()> {
    stream.set_nodelay(true)?;

    while let Some(body) = read_frame(&mut stream).await? {
        let reply = match decode_message(&body) {
            Ok(msg) => {
                debug!(request = msg.name(), "request");
                coordinator.handle_message(msg).await
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), "malformed request");
                Message::Error(BrokerError::Protocol(format!("malformed request: {:#}", e)).to_message())
            }
        };
        write_message(&mut stream, &reply).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::control::ControlError;
    use crate::distributed::dispatch::LocalDispatcher;
    use crate::distributed::error::ErrorKind;
    use crate::grid::Cell;
    use crate::distributed::protocol::fixtures;
    use crate::worker::step;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn glider(width: usize, height: usize) -> Grid {
        Grid::with_alive(
            width,
            height,
            &[
                Cell::new(1, 0),
                Cell::new(2, 1),
                Cell::new(0, 2),
                Cell::new(1, 2),
                Cell::new(2, 2),
            ],
        )
        .unwrap()
    }

    fn sequential(grid: &Grid, turns: u64) -> Grid {
        let mut grid = grid.clone();
        for _ in 0..turns {
            grid = step(&grid).unwrap();
        }
        grid
    }

    /// Poll until `check` holds or a second has passed
    async fn eventually<F: Fn() -> bool>(check: F) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_new_rejects_empty_roster() {
        assert!(Coordinator::new(LocalDispatcher::new(0)).is_err());
    }

    #[tokio::test]
    async fn test_run_completes_all_turns() {
        let coordinator = Coordinator::new(LocalDispatcher::new(2)).unwrap();
        let start = glider(8, 8);

        let outcome = coordinator.run_generations(start.clone(), 4, 2).await.unwrap();
        assert_eq!(outcome.completed_turns, 4);
        assert!(!outcome.reset);
        assert_eq!(*outcome.grid, sequential(&start, 4));
    }

    #[tokio::test]
    async fn test_glider_moves_one_cell_diagonally() {
        let coordinator = Coordinator::new(LocalDispatcher::new(2)).unwrap();
        let outcome = coordinator.run_generations(glider(8, 8), 4, 2).await.unwrap();

        let moved = vec![
            Cell::new(2, 1),
            Cell::new(3, 2),
            Cell::new(1, 3),
            Cell::new(2, 3),
            Cell::new(3, 3),
        ];
        assert_eq!(outcome.grid.alive_cells(), moved);
    }

    #[tokio::test]
    async fn test_sharding_matches_sequential() {
        let start = Grid::random(20, 11, 0.4, 99).unwrap();
        let expected = sequential(&start, 6);

        for workers in 1..=5 {
            let dispatcher = LocalDispatcher::new(5);
            let coordinator = Coordinator::new(dispatcher.clone()).unwrap();
            let outcome = coordinator.run_generations(start.clone(), 6, workers).await.unwrap();
            assert_eq!(*outcome.grid, expected, "diverged with {} workers", workers);

            // One band per worker per turn, and only the first `workers` roster entries
            for w in 0..5 {
                let expected_calls = if w < workers { 6 } else { 0 };
                assert_eq!(dispatcher.calls(w), expected_calls);
            }
        }
    }

    #[tokio::test]
    async fn test_zero_turns_returns_initial_grid() {
        let coordinator = Coordinator::new(LocalDispatcher::new(1)).unwrap();
        let start = glider(6, 6);
        let outcome = coordinator.run_generations(start.clone(), 0, 1).await.unwrap();
        assert_eq!(outcome.completed_turns, 0);
        assert_eq!(*outcome.grid, start);
    }

    #[tokio::test]
    async fn test_rejects_malformed_partitions() {
        let coordinator = Coordinator::new(LocalDispatcher::new(2)).unwrap();

        let err = coordinator.run_generations(glider(8, 8), 1, 0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);

        let err = coordinator.run_generations(glider(8, 8), 1, 3).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);

        let err = coordinator.run_generations(Grid::empty(), 1, 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn test_worker_failure_aborts_run_and_keeps_last_generation() {
        let coordinator = Coordinator::new(LocalDispatcher::new(2).with_failing_worker(1)).unwrap();
        let start = glider(8, 8);

        let err = coordinator.run_generations(start.clone(), 5, 2).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);

        // Nothing was committed
        let (turn, grid) = coordinator.snapshot().unwrap();
        assert_eq!(turn, 0);
        assert_eq!(*grid, start);
    }

    #[tokio::test]
    async fn test_pause_and_resume_gate_the_loop() {
        let dispatcher = LocalDispatcher::new(1).with_band_delay(Duration::from_millis(5));
        let coordinator = Coordinator::new(dispatcher).unwrap();

        let run = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run_generations(glider(8, 8), 1_000, 1).await })
        };

        eventually(|| coordinator.state().turn() >= 2).await;
        coordinator.pause().unwrap();

        // At most the in-flight round lands after the pause
        tokio::time::sleep(Duration::from_millis(30)).await;
        let paused_at = coordinator.state().turn();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(coordinator.state().turn(), paused_at);

        // Illegal transitions are errors, not hangs
        let err = coordinator.pause().unwrap_err();
        assert!(matches!(err, BrokerError::IllegalState(ControlError::AlreadyPaused)));

        coordinator.resume().unwrap();
        let err = coordinator.resume().unwrap_err();
        assert!(matches!(err, BrokerError::IllegalState(ControlError::NotPaused)));

        eventually(|| coordinator.state().turn() > paused_at).await;

        coordinator.reset().unwrap();
        let outcome = run.await.unwrap().unwrap();
        assert!(outcome.reset);
        assert!(outcome.completed_turns < 1_000);
    }

    #[tokio::test]
    async fn test_reset_mid_run_then_fresh_run() {
        let dispatcher = LocalDispatcher::new(2).with_band_delay(Duration::from_millis(2));
        let coordinator = Coordinator::new(dispatcher).unwrap();

        let run = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run_generations(glider(8, 8), 100, 2).await })
        };

        eventually(|| coordinator.state().turn() >= 10).await;
        let observed = coordinator.reset().unwrap();
        assert!(observed >= 10);

        let outcome = run.await.unwrap().unwrap();
        assert!(outcome.reset);
        assert!(outcome.completed_turns < 100);
        assert!(outcome.completed_turns >= observed);

        // The next run counts from 0 with its own grid
        let fresh = Grid::with_alive(4, 4, &[Cell::new(1, 1), Cell::new(2, 1), Cell::new(1, 2), Cell::new(2, 2)]).unwrap();
        let outcome = coordinator.run_generations(fresh.clone(), 3, 2).await.unwrap();
        assert_eq!(outcome.completed_turns, 3);
        assert_eq!(*outcome.grid, fresh);
    }

    #[tokio::test]
    async fn test_reset_releases_paused_run() {
        let dispatcher = LocalDispatcher::new(1).with_band_delay(Duration::from_millis(2));
        let coordinator = Coordinator::new(dispatcher).unwrap();

        let run = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run_generations(glider(8, 8), 10_000, 1).await })
        };

        eventually(|| coordinator.state().turn() >= 1).await;
        coordinator.pause().unwrap();
        coordinator.reset().unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("paused run should unwind after reset")
            .unwrap()
            .unwrap();
        assert!(outcome.reset);
        assert!(coordinator.state().gate.is_open());
    }

    #[tokio::test]
    async fn test_stale_reset_does_not_cut_next_run() {
        let coordinator = Coordinator::new(LocalDispatcher::new(1)).unwrap();
        coordinator.reset().unwrap();

        let outcome = coordinator.run_generations(glider(8, 8), 3, 1).await.unwrap();
        assert_eq!(outcome.completed_turns, 3);
        assert!(!outcome.reset);
    }

    #[tokio::test]
    async fn test_snapshot_and_alive_count() {
        let coordinator = Coordinator::new(LocalDispatcher::new(2)).unwrap();

        // Before any run
        assert_eq!(coordinator.alive_count(16, 16).unwrap(), (0, 0));

        coordinator.run_generations(glider(8, 8), 2, 2).await.unwrap();
        let first = coordinator.snapshot().unwrap();
        let second = coordinator.snapshot().unwrap();
        assert_eq!(first.0, 2);
        assert_eq!(first, second);
        assert_eq!(coordinator.alive_count(8, 8).unwrap(), (5, 2));
    }

    #[tokio::test]
    async fn test_shutdown_is_terminal() {
        let dispatcher = LocalDispatcher::new(3);
        let coordinator = Coordinator::new(dispatcher.clone()).unwrap();

        // Wrong signal is ignored
        assert!(!coordinator.shutdown('x').await.unwrap());
        assert!(!coordinator.is_terminated());

        assert!(coordinator.shutdown(SHUTDOWN_SIGNAL).await.unwrap());
        assert!(coordinator.is_terminated());
        assert_eq!(dispatcher.shutdowns(), 1);

        // Nothing is valid afterwards
        assert_eq!(coordinator.pause().unwrap_err().kind(), ErrorKind::ShuttingDown);
        assert_eq!(coordinator.snapshot().unwrap_err().kind(), ErrorKind::ShuttingDown);
        assert_eq!(
            coordinator.run_generations(glider(8, 8), 1, 1).await.unwrap_err().kind(),
            ErrorKind::ShuttingDown
        );
        assert_eq!(
            coordinator.shutdown(SHUTDOWN_SIGNAL).await.unwrap_err().kind(),
            ErrorKind::ShuttingDown
        );
    }

    #[tokio::test]
    async fn test_shutdown_mid_run_keeps_whole_generations() {
        let dispatcher = LocalDispatcher::new(2).with_band_delay(Duration::from_millis(5));
        let coordinator = Coordinator::new(dispatcher).unwrap();
        let start = glider(8, 8);

        let run = {
            let coordinator = coordinator.clone();
            let start = start.clone();
            tokio::spawn(async move { coordinator.run_generations(start, 10_000, 2).await })
        };

        eventually(|| coordinator.state().turn() >= 3).await;
        coordinator.shutdown(SHUTDOWN_SIGNAL).await.unwrap();

        let err = run.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShuttingDown);

        // The committed grid is exactly `turn` generations of the start grid
        let (turn, grid) = coordinator.state().snapshot();
        assert_eq!(*grid, sequential(&start, turn));
    }

    #[tokio::test]
    async fn test_handle_message_validates_run_request() {
        let coordinator = Coordinator::new(LocalDispatcher::new(1)).unwrap();

        let reply = coordinator
            .handle_message(Message::RunGenerations(RunGenerationsRequest {
                protocol_version: PROTOCOL_VERSION,
                grid: glider(8, 8),
                turns: 1,
                width: 9,
                height: 8,
                worker_count: 1,
            }))
            .await;
        match reply {
            Message::Error(err) => assert_eq!(err.kind, ErrorKind::InvalidRequest),
            other => panic!("Expected ERROR, got {}", other.name()),
        }

        let reply = coordinator
            .handle_message(Message::RunGenerations(RunGenerationsRequest {
                protocol_version: PROTOCOL_VERSION + 1,
                grid: glider(8, 8),
                turns: 1,
                width: 8,
                height: 8,
                worker_count: 1,
            }))
            .await;
        assert!(matches!(reply, Message::Error(_)));

        let reply = coordinator.handle_message(Message::WorkerShutdown).await;
        match reply {
            Message::Error(err) => assert_eq!(err.kind, ErrorKind::Protocol),
            other => panic!("Expected ERROR, got {}", other.name()),
        }
    }

    #[tokio::test]
    async fn test_late_pause_cannot_strand_run_after_shutdown() {
        let dispatcher = LocalDispatcher::new(1).with_band_delay(Duration::from_millis(2));
        let coordinator = Coordinator::new(dispatcher).unwrap();

        let run = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run_generations(glider(8, 8), 10_000, 1).await })
        };

        eventually(|| coordinator.state().turn() >= 1).await;
        coordinator.pause().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // A pause racing the shutdown closes the gate again after it was released
        coordinator.shutdown(SHUTDOWN_SIGNAL).await.unwrap();
        let _ = coordinator.state().gate.close();

        let err = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("run should unwind after shutdown")
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShuttingDown);
    }

    #[tokio::test]
    async fn test_broker_rejects_grid_with_short_buffer() {
        let service = BrokerService::bind("127.0.0.1:0", Coordinator::new(LocalDispatcher::new(1)).unwrap())
            .await
            .unwrap();
        let addr = service.local_addr().unwrap();
        tokio::spawn(service.run());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&fixtures::short_run_request()).await.unwrap();
        match expect_message(&mut stream).await.unwrap() {
            Message::Error(err) => assert_eq!(err.kind, ErrorKind::Protocol),
            other => panic!("Expected ERROR, got {}", other.name()),
        }

        // Nothing was installed and the connection keeps serving
        write_message(&mut stream, &Message::AliveCount(AliveCountRequest { width: 8, height: 8 }))
            .await
            .unwrap();
        match expect_message(&mut stream).await.unwrap() {
            Message::AliveCountReply(reply) => {
                assert_eq!(reply.alive_count, 0);
                assert_eq!(reply.turn, 0);
            }
            other => panic!("Expected ALIVE_COUNT_REPLY, got {}", other.name()),
        }
        write_message(&mut stream, &Message::Snapshot).await.unwrap();
        match expect_message(&mut stream).await.unwrap() {
            Message::SnapshotReply(reply) => assert!(reply.grid.is_empty()),
            other => panic!("Expected SNAPSHOT_REPLY, got {}", other.name()),
        }
    }
}
