//! Centralized error type for the patchbay umbrella crate.
//!
//! Wraps both member crates' errors so `?` propagates naturally across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Graph: {0}")]
    Graph(#[from] patchbay_graph::Error),

    #[error(transparent)]
    Client(#[from] patchbay_client::Error),

    /// Runtime setup, before any client exists.
    #[error("Transport: {0}")]
    Transport(#[from] patchbay_client::TransportError),
}

pub type Result<T> = std::result::Result<T, Error>;
