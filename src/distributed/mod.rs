//! Distributed broker/worker implementation
//!
//! # Architecture
//!
//! Lifebroker uses a broker-worker architecture:
//!
//! - **Broker**: Owns the grid, runs the generation loop, serves the control plane
//! - **Workers**: Stateless processes computing one row band per request
//! - **Client**: Submits runs and issues control-plane requests to the broker
//!
//! # Modules
//!
//! - `protocol`: Message definitions and framing
//! - `error`: Error kinds shared across the wire
//! - `control`: Pause gate, reset and shutdown flags
//! - `state`: Shared broker state (grid + turn)
//! - `dispatch`: How the broker reaches its workers
//! - `coordinator`: Generation loop, control plane and broker TCP service
//! - `node_service`: Worker TCP service
//! - `client`: Broker client

pub mod client;
pub mod control;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod node_service;
pub mod protocol;
pub mod state;

// Re-export key types
pub use protocol::{Message, PROTOCOL_VERSION};

pub use client::BrokerClient;
pub use coordinator::{BrokerService, Coordinator, RunOutcome, SHUTDOWN_SIGNAL};
pub use dispatch::{BandDispatcher, LocalDispatcher, RemoteDispatcher};
pub use error::{BrokerError, ErrorKind, RemoteError};
pub use node_service::NodeService;
