//! # Patchbay - Audio/MIDI Graph Client
//!
//! Mirrors a routing server's port graph in memory, links ports, and
//! publishes this process's own MIDI node.
//!
//! ## Architecture
//!
//! Patchbay is an umbrella crate over:
//! - **patchbay-graph** - Port records, classification, and the graph mirror
//! - **patchbay-client** - Connection handle, event subscriber, sync barrier,
//!   link manager, and local endpoint publisher
//!
//! ## Quick Start
//!
//! ```ignore
//! use patchbay::prelude::*;
//!
//! let instance = Instance::new(backend)?;
//! let mut client = GraphClient::builder()
//!     .client_name("sequencer")
//!     .build(instance)?;
//!
//! let published = client.publish("sequencer", 1, 1)?;
//! for port in client.list_ports(MediaKind::Midi, Direction::Output) {
//!     println!("{}", port.display_name());
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `default` - Includes `memory`
//! - `memory` - In-process graph server backend

/// Re-export of patchbay-graph for direct access
pub use patchbay_graph as graph;

/// Re-export of patchbay-client for direct access
pub use patchbay_client as client;

pub use patchbay_graph::{
    keys, properties, Category, Direction, Graph, MediaKind, Node, Origin, PortInfo, Properties,
};

pub use patchbay_client::{
    Backend, ClientConfig, GraphChange, GraphClient, GraphClientBuilder, GraphObserver,
    GraphReader, Instance, LinkHandle, LocalEndpoint, LocalPort, Publication, PublishedEndpoint, SyncStats, Transport,
    TransportError, TransportEvent,
};

#[cfg(feature = "memory")]
pub use patchbay_client::MemoryServer;

mod error;
pub use error::{Error, Result};

/// Convenience prelude for common imports
pub mod prelude {
    // Client
    pub use crate::{
        ClientConfig, GraphChange, GraphClient, Instance, LinkHandle, PublishedEndpoint,
    };

    // Mirror
    pub use crate::{Category, Direction, MediaKind, PortInfo};

    // In-process server
    #[cfg(feature = "memory")]
    pub use crate::MemoryServer;

    pub use crate::{Error, Result};
}
