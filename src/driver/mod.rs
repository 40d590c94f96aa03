//! Client driver
//!
//! The driver submits one run to the broker and, while that run is in flight:
//! - polls the live-cell count on a fixed tick
//! - reacts to key commands
//! - reports progress as [`Event`]s on an mpsc channel
//!
//! # Keys
//!
//! | Key | Action |
//! |-----|--------|
//! | `s` | snapshot the broker's grid to an image |
//! | `p` | pause, or resume if already paused |
//! | `q` | reset the broker's run and quit; broker and workers stay up |
//! | `k` | snapshot, shut the broker and its workers down, quit |
//!
//! Every broker call uses its own connection: the run call holds one for the whole
//! run, the ticker another, and key commands a third.

use crate::distributed::client::BrokerClient;
use crate::distributed::coordinator::SHUTDOWN_SIGNAL;
use crate::grid::{Cell, Grid};
use crate::output::pgm::SnapshotSink;
use crate::Result;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Run parameters
#[derive(Debug, Clone)]
pub struct Params {
    /// Broker address (IP:port)
    pub broker: String,
    pub width: usize,
    pub height: usize,
    pub turns: u64,
    /// Workers to split each generation across
    pub threads: usize,
    /// Interval between live-cell polls
    pub tick: Duration,
}

/// Client state as reported by [`Event::StateChange`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Executing,
    Paused,
    Quitting,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Executing => write!(f, "Executing"),
            State::Paused => write!(f, "Paused"),
            State::Quitting => write!(f, "Quitting"),
        }
    }
}

/// Progress notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A cell changed state; sent at turn 0 for every initially live cell
    CellFlipped { turn: u64, cell: Cell },

    /// Periodic live-cell count
    AliveCellsCount { turn: u64, cells: usize },

    /// A snapshot image was written
    ImageOutputComplete { turn: u64, filename: String },

    /// The run finished; `alive` lists the live cells of the final grid
    FinalTurnComplete { turn: u64, alive: Vec<Cell> },

    StateChange { turn: u64, state: State },
}

/// How the driver stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The run finished (all turns, or cut short by a reset from elsewhere)
    Completed,
    /// `q`: the run was reset and the client quit
    Quit,
    /// `k`: the broker was shut down
    Killed,
}

/// Summary of one driver session
#[derive(Debug, Clone)]
pub struct RunReport {
    pub exit: Exit,

    /// Last turn the driver observed
    pub turn: u64,

    /// Final grid, when the run completed
    pub grid: Option<Arc<Grid>>,

    /// Snapshot names written during the session
    pub snapshots: Vec<String>,

    pub elapsed: Duration,
}

impl RunReport {
    pub fn alive_cells(&self) -> Option<usize> {
        self.grid.as_ref().map(|g| g.alive_count())
    }
}

/// Client driver
pub struct Driver<S> {
    params: Params,
    sink: Arc<S>,
    events: mpsc::UnboundedSender<Event>,
}

impl<S: SnapshotSink + 'static> Driver<S> {
    pub fn new(params: Params, sink: S, events: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            params,
            sink: Arc::new(sink),
            events,
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    fn emit(&self, event: Event) {
        // The consumer may have gone away; events are advisory
        let _ = self.events.send(event);
    }

    /// Evolve `initial` on the broker, serving keys until the run ends or a key ends it
    ///
    /// A closed key channel simply stops key handling; the run continues.
    pub async fn run(&self, initial: Grid, mut keys: mpsc::Receiver<char>) -> Result<RunReport> {
        let started = Instant::now();
        let mut run_client = BrokerClient::connect(&self.params.broker).await?;
        let mut control = BrokerClient::connect(&self.params.broker).await?;

        info!(
            broker = %self.params.broker,
            width = self.params.width,
            height = self.params.height,
            turns = self.params.turns,
            threads = self.params.threads,
            "submitting run"
        );

        for cell in initial.alive_cells() {
            self.emit(Event::CellFlipped { turn: 0, cell });
        }

        let ticker = self.spawn_ticker();
        let mut session = Session::default();

        let run = run_client.run_generations(initial, self.params.turns, self.params.threads);
        tokio::pin!(run);

        let mut keys_open = true;
        let outcome = loop {
            tokio::select! {
                result = &mut run => break result.map(|(grid, turn)| (Exit::Completed, turn, Some(grid))),
                key = keys.recv(), if keys_open => match key {
                    Some(key) => match self.handle_key(&mut control, &mut session, key).await {
                        Ok(Some((exit, turn))) => break Ok((exit, turn, None)),
                        Ok(None) => {}
                        Err(e) => warn!(%key, error = %format!("{:#}", e), "key command failed"),
                    },
                    None => {
                        debug!("key input closed");
                        keys_open = false;
                    }
                },
            }
        };

        ticker.abort();
        let (exit, turn, grid) = outcome?;

        if let Some(grid) = &grid {
            self.emit(Event::FinalTurnComplete {
                turn,
                alive: grid.alive_cells(),
            });
            let filename = self.sink.write_snapshot(grid, turn)?;
            self.emit(Event::ImageOutputComplete {
                turn,
                filename: filename.clone(),
            });
            session.snapshots.push(filename);
        }

        self.emit(Event::StateChange {
            turn,
            state: State::Quitting,
        });

        Ok(RunReport {
            exit,
            turn,
            grid,
            snapshots: session.snapshots,
            elapsed: started.elapsed(),
        })
    }

    /// Poll the live-cell count every tick on a dedicated connection
    fn spawn_ticker(&self) -> JoinHandle<()> {
        let broker = self.params.broker.clone();
        let (width, height) = (self.params.width, self.params.height);
        let tick = self.params.tick;
        let events = self.events.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
            let mut client: Option<BrokerClient> = None;

            loop {
                interval.tick().await;

                if client.is_none() {
                    match BrokerClient::connect(&broker).await {
                        Ok(c) => client = Some(c),
                        Err(e) => {
                            warn!(error = %format!("{:#}", e), "ticker could not reach broker");
                            continue;
                        }
                    }
                }
                let Some(c) = client.as_mut() else { continue };

                match c.alive_count(width, height).await {
                    Ok((cells, turn)) => {
                        let _ = events.send(Event::AliveCellsCount { turn, cells });
                    }
                    Err(e) => {
                        warn!(error = %format!("{:#}", e), "alive count failed");
                        // Reconnect on the next tick
                        client = None;
                    }
                }
            }
        })
    }

    /// Act on one key; returns the exit and turn when the key ends the session
    async fn handle_key(
        &self,
        control: &mut BrokerClient,
        session: &mut Session,
        key: char,
    ) -> Result<Option<(Exit, u64)>> {
        match key {
            's' => {
                self.snapshot(control, session).await?;
                Ok(None)
            }
            'p' => {
                let state = if session.paused {
                    control.resume().await?;
                    session.paused = false;
                    State::Executing
                } else {
                    control.pause().await?;
                    session.paused = true;
                    State::Paused
                };
                let (_, turn) = control.alive_count(0, 0).await?;
                info!(turn, %state, "pause toggled");
                self.emit(Event::StateChange { turn, state });
                Ok(None)
            }
            'q' => {
                let turn = control.reset().await?;
                info!(turn, "run reset, quitting");
                Ok(Some((Exit::Quit, turn)))
            }
            'k' => {
                let turn = self.snapshot(control, session).await?;
                control.shutdown(SHUTDOWN_SIGNAL).await?;
                info!(turn, "broker shut down, quitting");
                Ok(Some((Exit::Killed, turn)))
            }
            other => {
                debug!(key = %other, "ignoring key");
                Ok(None)
            }
        }
    }

    /// Fetch the broker's grid and write it out
    async fn snapshot(&self, control: &mut BrokerClient, session: &mut Session) -> Result<u64> {
        let (turn, grid) = control.snapshot().await?;
        let filename = self.sink.write_snapshot(&grid, turn)?;
        self.emit(Event::ImageOutputComplete {
            turn,
            filename: filename.clone(),
        });
        session.snapshots.push(filename);
        Ok(turn)
    }
}

/// Mutable state of one driver session
#[derive(Debug, Default)]
struct Session {
    paused: bool,
    snapshots: Vec<String>,
}
