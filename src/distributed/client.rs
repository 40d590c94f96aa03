//! Broker client
//!
//! Thin request/response wrapper over one broker connection. Each call writes a
//! request and waits for exactly one reply. An ERROR reply becomes a
//! [`RemoteError`] inside the returned `anyhow::Error`, so callers can
//! `downcast_ref::<RemoteError>()` to match on its kind.
//!
//! A connection blocks for the whole of RUN_GENERATIONS, so control-plane calls
//! made during a run need their own client.

use crate::distributed::error::RemoteError;
use crate::distributed::protocol::*;
use crate::grid::Grid;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::debug;

pub struct BrokerClient {
    stream: TcpStream,
    addr: String,
}

impl BrokerClient {
    /// Connect to the broker at `addr` (IP:port)
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("Failed to connect to broker at {}", addr))?;
        stream.set_nodelay(true)?;
        debug!(broker = addr, "connected");

        Ok(Self {
            stream,
            addr: addr.to_string(),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn call(&mut self, request: Message) -> Result<Message> {
        let name = request.name();
        write_message(&mut self.stream, &request)
            .await
            .with_context(|| format!("Failed to send {} to {}", name, self.addr))?;

        match expect_message(&mut self.stream)
            .await
            .with_context(|| format!("No reply to {} from {}", name, self.addr))?
        {
            Message::Error(err) => Err(RemoteError::from(err).into()),
            reply => Ok(reply),
        }
    }

    /// Evolve `grid` for `turns` generations on `worker_count` workers
    ///
    /// Returns the final grid and the number of generations completed, which is
    /// below `turns` when the run was reset.
    pub async fn run_generations(&mut self, grid: Grid, turns: u64, worker_count: usize) -> Result<(Arc<Grid>, u64)> {
        let request = RunGenerationsRequest {
            protocol_version: PROTOCOL_VERSION,
            width: grid.width(),
            height: grid.height(),
            grid,
            turns,
            worker_count,
        };

        match self.call(Message::RunGenerations(request)).await? {
            Message::RunComplete(reply) => Ok((reply.grid, reply.completed_turns)),
            other => anyhow::bail!("Expected RUN_COMPLETE, got {}", other.name()),
        }
    }

    /// Live cells within `width` x `height`, with the turn they were counted at
    pub async fn alive_count(&mut self, width: usize, height: usize) -> Result<(usize, u64)> {
        match self.call(Message::AliveCount(AliveCountRequest { width, height })).await? {
            Message::AliveCountReply(reply) => Ok((reply.alive_count, reply.turn)),
            other => anyhow::bail!("Expected ALIVE_COUNT reply, got {}", other.name()),
        }
    }

    /// Current turn and grid
    pub async fn snapshot(&mut self) -> Result<(u64, Arc<Grid>)> {
        match self.call(Message::Snapshot).await? {
            Message::SnapshotReply(reply) => Ok((reply.turn, reply.grid)),
            other => anyhow::bail!("Expected SNAPSHOT reply, got {}", other.name()),
        }
    }

    pub async fn pause(&mut self) -> Result<()> {
        self.expect_ack(Message::Pause).await
    }

    pub async fn resume(&mut self) -> Result<()> {
        self.expect_ack(Message::Resume).await
    }

    /// Ask the active run to stop early; returns the turn the broker was on
    pub async fn reset(&mut self) -> Result<u64> {
        match self.call(Message::Reset).await? {
            Message::ResetReply(reply) => Ok(reply.turn),
            other => anyhow::bail!("Expected RESET reply, got {}", other.name()),
        }
    }

    /// Ask the broker to shut itself and its workers down
    pub async fn shutdown(&mut self, signal: char) -> Result<()> {
        self.expect_ack(Message::BrokerShutdown(BrokerShutdownRequest { signal })).await
    }

    async fn expect_ack(&mut self, request: Message) -> Result<()> {
        let name = request.name();
        match self.call(request).await? {
            Message::Ack => Ok(()),
            other => anyhow::bail!("Expected ACK to {}, got {}", name, other.name()),
        }
    }
}
