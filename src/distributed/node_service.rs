//! Worker node service
//!
//! This module implements the service that runs on each worker node. The service:
//! - Listens for connections from the broker
//! - Computes one band per COMPUTE_BAND request and replies with BAND_RESULT
//! - Acknowledges WORKER_SHUTDOWN and then stops accepting connections
//!
//! A worker holds no state between requests. Each request carries the whole
//! current grid, so any worker can compute any band and a restarted worker is
//! immediately usable.

use crate::distributed::error::{ErrorKind, ErrorMessage};
use crate::distributed::protocol::*;
use crate::grid::RowBand;
use crate::worker;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Worker node service
///
/// Runs on each worker node, answering band requests from the broker.
pub struct NodeService {
    listener: TcpListener,

    /// Node identifier (hostname)
    node_id: String,

    /// Flipped once a WORKER_SHUTDOWN has been acknowledged
    shutdown: watch::Sender<bool>,
}

impl NodeService {
    /// Bind the node service
    ///
    /// # Arguments
    ///
    /// * `addr` - Listen address, e.g. `0.0.0.0:8000`
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind node service on {}", addr))?;
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            listener,
            node_id: get_node_id(),
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("Failed to read node service address")
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Run the node service until the broker asks it to stop
    pub async fn run(self) -> Result<()> {
        info!(addr = %self.local_addr()?, node = %self.node_id, "node service listening");

        let node_id: Arc<str> = Arc::from(self.node_id.as_str());
        let mut stopped = self.shutdown.subscribe();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted.context("Failed to accept connection")?;
                    debug!(%peer, "broker connected");

                    let node_id = Arc::clone(&node_id);
                    let shutdown = self.shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &node_id, &shutdown).await {
                            warn!(%peer, error = %format!("{:#}", e), "connection failed");
                        }
                    });
                }
                _ = stopped.changed() => {
                    info!(node = %node_id, "node service stopped");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Serve requests on one broker connection until it closes
async fn handle_connection(mut stream: TcpStream, node_id: &str, shutdown: &watch::Sender<bool>) -> Result<()> {
    stream.set_nodelay(true)?;

    while let Some(body) = read_frame(&mut stream).await? {
        let msg = match decode_message(&body) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(node = %node_id, error = %format!("{:#}", e), "malformed request");
                let reply = Message::Error(ErrorMessage {
                    kind: ErrorKind::Protocol,
                    error: format!("malformed request: {:#}", e),
                });
                write_message(&mut stream, &reply).await?;
                continue;
            }
        };
        match msg {
            Message::ComputeBand(request) => {
                let reply = compute(request).await;
                write_message(&mut stream, &reply).await?;
            }
            Message::WorkerShutdown => {
                info!(node = %node_id, "shutdown requested");
                write_message(&mut stream, &Message::Ack).await?;
                shutdown.send_replace(true);
                break;
            }
            other => {
                let reply = Message::Error(ErrorMessage {
                    kind: ErrorKind::Protocol,
                    error: format!("worker does not handle {}", other.name()),
                });
                write_message(&mut stream, &reply).await?;
            }
        }
    }

    Ok(())
}

/// Validate a band request and compute it off the async runtime
async fn compute(request: ComputeBandRequest) -> Message {
    if request.grid.width() != request.width || request.grid.height() != request.height {
        return Message::Error(ErrorMessage {
            kind: ErrorKind::InvalidRequest,
            error: format!(
                "grid is {}x{} but {}x{} was declared",
                request.grid.width(),
                request.grid.height(),
                request.width,
                request.height
            ),
        });
    }

    let band = RowBand::new(request.start_y, request.end_y);
    debug!(start_y = band.start_y, end_y = band.end_y, "computing band");

    let grid = Arc::clone(&request.grid);
    let result = tokio::task::spawn_blocking(move || worker::compute_band(&grid, band)).await;

    match result {
        Ok(Ok(band)) => Message::BandResult(ComputeBandResponse { band }),
        Ok(Err(e)) => Message::Error(ErrorMessage {
            kind: ErrorKind::InvalidRequest,
            error: e.to_string(),
        }),
        Err(e) => Message::Error(ErrorMessage {
            kind: ErrorKind::Protocol,
            error: format!("band computation failed: {}", e),
        }),
    }
}

/// Get node identifier (hostname)
fn get_node_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
