//! Graph-mirroring client for an audio/MIDI routing server.
//!
//! Keeps a live, classified copy of every port in the server's graph, links
//! ports, and publishes this process's own MIDI node.
//!
//! Feature gates: `memory` (in-process server backend, on by default).

pub mod error;
pub use error::{Error, Result};

pub mod config;
pub use config::{ClientConfig, DEFAULT_MAX_NAME_LEN, DEFAULT_SYNC_RETRY_LIMIT};

pub mod transport;
pub use transport::{
    Backend, Instance, NodeToken, ObjectType, PortToken, ProxyId, Transport, TransportError,
    TransportEvent, LINK_FACTORY, UNASSIGNED_NODE_ID,
};

mod subscriber;
pub use subscriber::{EventSubscriber, GraphChange, SubscriberState};

mod sync;
pub use sync::{SyncBarrier, SyncStats};

mod client;
pub use client::{GraphClient, GraphClientBuilder, GraphObserver, GraphReader};

mod link;
pub use link::LinkHandle;

mod endpoint;
pub use endpoint::{LocalEndpoint, LocalPort, Publication, PublishedEndpoint, MIDI_FORMAT};

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::{MemoryBackend, MemoryServer, MemoryTransport};

pub use patchbay_graph::{
    keys, properties, Category, Direction, Graph, MediaKind, Node, Origin, PortInfo, Properties,
};
