//! Broker/worker/client wire protocol
//!
//! This module defines every message exchanged between the client, the broker and
//! the workers. Messages are serialized with MessagePack (rmp-serde), which keeps the
//! large grid payloads compact while supporting every serde feature.
//!
//! # Protocol Version
//!
//! Current version: 1
//!
//! # Message Flow
//!
//! ```text
//! Client                     Broker                       Worker (x N)
//!   |-- RUN_GENERATIONS ------->|                              |
//!   |                           |-- COMPUTE_BAND(band i) ----->|
//!   |                           |<----------- BAND_RESULT -----|
//!   |                           |   ... one round per turn ... |
//!   |<------------ RUN_COMPLETE-|                              |
//!   |                           |                              |
//!   |-- ALIVE_COUNT / SNAPSHOT->|   (on separate connections,  |
//!   |-- PAUSE / RESUME / RESET->|    while the run is active)  |
//!   |                           |                              |
//!   |-- BROKER_SHUTDOWN('k') -->|-- WORKER_SHUTDOWN ---------->|
//!   |<---------------------- ACK|<------------------------ ACK-|
//! ```
//!
//! A connection carries any number of request/response exchanges in sequence.
//!
//! # Message Framing
//!
//! Each message is prefixed with a 4-byte length field (little-endian u32):
//!
//! ```text
//! [4 bytes: message length][N bytes: MessagePack-serialized message]
//! ```

use crate::distributed::error::ErrorMessage;
use crate::grid::Grid;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version
///
/// Increment this when making breaking changes to the protocol.
/// Client and broker must have matching protocol versions.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest accepted message body (256MB)
///
/// A 8192x8192 grid is 64MB of cells; this leaves headroom for the envelope.
pub const MAX_MESSAGE_BYTES: usize = 256 * 1024 * 1024;

/// Protocol message
///
/// All messages exchanged between client, broker and workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Start a run (Client → Broker)
    ///
    /// Installs the supplied grid, resets the turn counter and evolves it for
    /// `turns` generations across `worker_count` workers. The reply is sent when
    /// the run finishes or is cut short by a reset.
    RunGenerations(RunGenerationsRequest),

    /// Run finished (Broker → Client)
    RunComplete(RunCompleteResponse),

    /// Count live cells inside the declared bounds (Client → Broker)
    AliveCount(AliveCountRequest),

    /// Live cell count and the turn it was taken at (Broker → Client)
    AliveCountReply(AliveCountResponse),

    /// Request the current turn and grid (Client → Broker)
    Snapshot,

    /// Current turn and grid (Broker → Client)
    SnapshotReply(SnapshotResponse),

    /// Close the pause gate (Client → Broker)
    Pause,

    /// Open the pause gate (Client → Broker)
    Resume,

    /// Cut the active run short at its next checkpoint (Client → Broker)
    Reset,

    /// Turn observed when the reset was requested (Broker → Client)
    ResetReply(ResetResponse),

    /// Shut down the broker and every worker (Client → Broker)
    ///
    /// Only the `'k'` signal triggers the shutdown; other signals are acknowledged
    /// and ignored.
    BrokerShutdown(BrokerShutdownRequest),

    /// Compute one band of the next generation (Broker → Worker)
    ComputeBand(ComputeBandRequest),

    /// Computed band (Worker → Broker)
    BandResult(ComputeBandResponse),

    /// Terminate the worker process (Broker → Worker)
    WorkerShutdown,

    /// Empty success reply (Broker → Client, Worker → Broker)
    Ack,

    /// Request failed (Broker → Client, Worker → Broker)
    Error(ErrorMessage),
}

impl Message {
    /// Short message name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Message::RunGenerations(_) => "RUN_GENERATIONS",
            Message::RunComplete(_) => "RUN_COMPLETE",
            Message::AliveCount(_) => "ALIVE_COUNT",
            Message::AliveCountReply(_) => "ALIVE_COUNT_REPLY",
            Message::Snapshot => "SNAPSHOT",
            Message::SnapshotReply(_) => "SNAPSHOT_REPLY",
            Message::Pause => "PAUSE",
            Message::Resume => "RESUME",
            Message::Reset => "RESET",
            Message::ResetReply(_) => "RESET_REPLY",
            Message::BrokerShutdown(_) => "BROKER_SHUTDOWN",
            Message::ComputeBand(_) => "COMPUTE_BAND",
            Message::BandResult(_) => "BAND_RESULT",
            Message::WorkerShutdown => "WORKER_SHUTDOWN",
            Message::Ack => "ACK",
            Message::Error(_) => "ERROR",
        }
    }
}

/// Run request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunGenerationsRequest {
    /// Protocol version (must match)
    pub protocol_version: u32,

    /// Initial grid
    pub grid: Grid,

    /// Number of generations to evolve
    pub turns: u64,

    /// Declared grid width (must match the grid)
    pub width: usize,

    /// Declared grid height (must match the grid)
    pub height: usize,

    /// Number of workers to split each generation across (1..=roster size)
    pub worker_count: usize,
}

/// Run result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCompleteResponse {
    /// Grid after the last completed generation
    pub grid: Arc<Grid>,

    /// Generations completed; less than requested when the run was reset
    pub completed_turns: u64,
}

/// Alive count request
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AliveCountRequest {
    pub width: usize,
    pub height: usize,
}

/// Alive count result
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AliveCountResponse {
    pub alive_count: usize,
    pub turn: u64,
}

/// Snapshot result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotResponse {
    pub turn: u64,
    pub grid: Arc<Grid>,
}

/// Reset result
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResetResponse {
    /// Turn counter at the moment the reset was requested
    pub turn: u64,
}

/// Broker shutdown request
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BrokerShutdownRequest {
    /// Key that triggered the shutdown; only `'k'` shuts down
    pub signal: char,
}

/// Band compute request
///
/// Carries the whole pre-generation grid so boundary rows can read their
/// neighbours in other bands, plus the dimensions needed for wrap-around.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeBandRequest {
    pub grid: Arc<Grid>,
    pub width: usize,
    pub height: usize,
    pub start_y: usize,
    pub end_y: usize,
}

/// Band compute result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeBandResponse {
    /// `end_y - start_y` rows; row 0 is `start_y`
    pub band: Grid,
}

/// Serialize a message to bytes
///
/// Prepends a 4-byte length field for framing.
///
/// # Message Format
///
/// ```text
/// [4 bytes: message length (little-endian u32)][N bytes: MessagePack message]
/// ```
pub fn serialize_message(msg: &Message) -> Result<Vec<u8>> {
    let msg_bytes = rmp_serde::to_vec(msg).context("Failed to serialize message")?;

    if msg_bytes.len() > MAX_MESSAGE_BYTES {
        anyhow::bail!(
            "Message too large: {} bytes (max {} bytes)",
            msg_bytes.len(),
            MAX_MESSAGE_BYTES
        );
    }

    // Prepend length field
    let msg_len = msg_bytes.len() as u32;
    let mut framed = Vec::with_capacity(4 + msg_bytes.len());
    framed.extend_from_slice(&msg_len.to_le_bytes());
    framed.extend_from_slice(&msg_bytes);

    Ok(framed)
}

/// Deserialize a message from bytes
///
/// Expects a 4-byte length prefix followed by a MessagePack-serialized message.
///
/// # Returns
///
/// Returns (message, bytes_consumed) where bytes_consumed includes the length prefix.
pub fn deserialize_message(buf: &[u8]) -> Result<(Message, usize)> {
    if buf.len() < 4 {
        anyhow::bail!("Buffer too small for message length (need 4 bytes, got {})", buf.len());
    }

    let msg_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if buf.len() < 4 + msg_len {
        anyhow::bail!("Incomplete message (need {} bytes, got {})", 4 + msg_len, buf.len());
    }

    let msg = rmp_serde::from_slice(&buf[4..4 + msg_len]).context("Failed to deserialize message")?;

    Ok((msg, 4 + msg_len))
}

/// Read one length-prefixed frame from a stream
///
/// Returns `Ok(None)` when the peer closed the connection cleanly before a new frame
/// started.
pub async fn read_frame<S>(stream: &mut S) -> Result<Option<Vec<u8>>>
where
    S: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("Failed to read message length"),
    }

    let msg_len = u32::from_le_bytes(len_buf) as usize;

    if msg_len > MAX_MESSAGE_BYTES {
        anyhow::bail!("Message too large: {} bytes (max {} bytes)", msg_len, MAX_MESSAGE_BYTES);
    }

    let mut msg_buf = vec![0u8; msg_len];
    stream
        .read_exact(&mut msg_buf)
        .await
        .context("Failed to read message body")?;

    Ok(Some(msg_buf))
}

/// Decode a frame body read by [`read_frame`]
pub fn decode_message(body: &[u8]) -> Result<Message> {
    rmp_serde::from_slice(body).context("Failed to deserialize message")
}

/// Read a complete message from a stream
///
/// Reads the length prefix, then the message body. Returns `Ok(None)` when the peer
/// closed the connection cleanly before a new message started.
pub async fn read_message<S>(stream: &mut S) -> Result<Option<Message>>
where
    S: AsyncRead + Unpin,
{
    match read_frame(stream).await? {
        Some(body) => decode_message(&body).map(Some),
        None => Ok(None),
    }
}

/// Read a message, treating a closed connection as an error
pub async fn expect_message<S>(stream: &mut S) -> Result<Message>
where
    S: AsyncRead + Unpin,
{
    read_message(stream)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Connection closed by peer"))
}

/// Write a message to a stream
///
/// Serializes the message with length prefix, writes it and flushes.
pub async fn write_message<S>(stream: &mut S, msg: &Message) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let framed = serialize_message(msg)?;

    stream.write_all(&framed).await.context("Failed to write message")?;

    // Flush to ensure message is sent immediately
    stream.flush().await.context("Failed to flush stream")?;

    Ok(())
}
