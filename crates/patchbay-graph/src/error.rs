//! Error types for graph parsing.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A port-info event carried a `node.id` that is not an integer.
    #[error("port {port_id} has malformed node id {value:?}")]
    MalformedNodeId { port_id: u32, value: String },
}

pub type Result<T> = std::result::Result<T, Error>;
