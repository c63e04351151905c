//! Error types for the graph client.

use crate::transport::TransportError;
use patchbay_graph::Direction;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Transport initialization failed: {0}")]
    TransportInitFailed(String),

    /// The mirror can no longer be trusted; the client is poisoned.
    #[error("Malformed graph event: port {port_id} has node id {node_id:?}")]
    MalformedGraphEvent { port_id: u32, node_id: String },

    #[error("Server refused link {output_port} -> {input_port}")]
    AllocationFailed { output_port: u32, input_port: u32 },

    #[error("Server refused to create node {0:?}")]
    NodeAllocationFailed(String),

    #[error("Server refused to create port {0:?}")]
    PortAllocationFailed(String),

    #[error("Name is {len} bytes, limit is {max}")]
    PortNameTooLong { len: usize, max: usize },

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Port {port_id} is not an {expected:?} port")]
    WrongDirection { port_id: u32, expected: Direction },

    #[error("Unknown local port")]
    UnknownLocalPort,

    #[error("Transport: {0}")]
    Transport(#[from] TransportError),
}

impl From<patchbay_graph::Error> for Error {
    fn from(e: patchbay_graph::Error) -> Self {
        match e {
            patchbay_graph::Error::MalformedNodeId { port_id, value } => {
                Error::MalformedGraphEvent {
                    port_id,
                    node_id: value,
                }
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
