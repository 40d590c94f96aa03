//! Error taxonomy shared by broker, workers and client
//!
//! Broker operations fail with a typed [`BrokerError`]. On the wire every failure
//! travels as an [`ErrorMessage`] carrying an [`ErrorKind`], and the client turns it
//! back into a [`RemoteError`] that callers can downcast and match on.

use crate::distributed::control::ControlError;
use crate::grid::GridError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure class carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed request: bad dimensions, zero or too many workers, version mismatch
    InvalidRequest,
    /// Request not valid in the current state (double pause, unmatched resume)
    IllegalState,
    /// The broker has started its terminal shutdown
    ShuttingDown,
    /// A worker could not be reached or its reply could not be read
    Transport,
    /// A worker did not answer within its deadline
    Timeout,
    /// The peer sent a message that makes no sense at this point
    Protocol,
}

/// Error payload of [`Message::Error`](crate::distributed::protocol::Message::Error)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub kind: ErrorKind,
    pub error: String,
}

/// Broker-side operation failure
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("illegal state: {0}")]
    IllegalState(#[from] ControlError),

    #[error("broker is shutting down")]
    ShuttingDown,

    #[error("worker {index} ({addr}) failed: {message}")]
    Transport {
        index: usize,
        addr: String,
        message: String,
    },

    #[error("worker {index} ({addr}) did not answer within {timeout_ms}ms")]
    Timeout {
        index: usize,
        addr: String,
        timeout_ms: u64,
    },

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl BrokerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BrokerError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            BrokerError::IllegalState(_) => ErrorKind::IllegalState,
            BrokerError::ShuttingDown => ErrorKind::ShuttingDown,
            BrokerError::Transport { .. } => ErrorKind::Transport,
            BrokerError::Timeout { .. } => ErrorKind::Timeout,
            BrokerError::Protocol(_) => ErrorKind::Protocol,
        }
    }

    /// Wire form of this error
    pub fn to_message(&self) -> ErrorMessage {
        ErrorMessage {
            kind: self.kind(),
            error: self.to_string(),
        }
    }
}

impl From<GridError> for BrokerError {
    fn from(e: GridError) -> Self {
        BrokerError::InvalidRequest(e.to_string())
    }
}

/// Error reported by the remote end of a connection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("remote {kind:?} error: {message}")]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<ErrorMessage> for RemoteError {
    fn from(msg: ErrorMessage) -> Self {
        Self {
            kind: msg.kind,
            message: msg.error,
        }
    }
}
