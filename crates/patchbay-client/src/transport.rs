//! Transport boundary to the graph server.
//!
//! A [`Backend`] owns process-wide runtime setup and opens connections; a
//! [`Transport`] is one live connection. Everything the server reports comes
//! back as [`TransportEvent`]s from [`Transport::drive_once`], so no server
//! callback ever holds a reference into the client.

use crate::config::ClientConfig;
use patchbay_graph::{Direction, Properties};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Node id the server reports before it has assigned one.
pub const UNASSIGNED_NODE_ID: u32 = u32::MAX;

/// Factory the server uses to create links.
pub const LINK_FACTORY: &str = "link-factory";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Transport disconnected")]
    Disconnected,

    #[error("Request rejected: {0}")]
    Rejected(String),
}

/// Client-side handle to a bound or created server object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProxyId(pub u32);

/// Handle to a node this process created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeToken(pub u32);

/// Handle to a port on a local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortToken(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Port,
    Node,
    Link,
    Device,
    Client,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A global object appeared.
    Global { id: u32, kind: ObjectType },
    /// A global object went away.
    GlobalRemoved { id: u32 },
    /// Current properties of a bound port.
    PortInfo { id: u32, props: Properties },
    /// The server has processed every request up to `seq`.
    Done { seq: u32 },
}

/// One connection to the graph server.
///
/// Requests are fire-and-forget: their effects arrive later as events. Use a
/// sync request and wait for the matching [`TransportEvent::Done`] to know
/// they were applied.
pub trait Transport: Send {
    fn subscribe_globals(&mut self) -> Result<(), TransportError>;

    fn unsubscribe_globals(&mut self);

    /// Bind a proxy to global `id`. `None` if the object is already gone.
    fn bind_object(&mut self, id: u32, kind: ObjectType) -> Option<ProxyId>;

    /// Start receiving [`TransportEvent::PortInfo`] for a bound proxy.
    fn subscribe_object_info(&mut self, proxy: ProxyId);

    fn destroy_proxy(&mut self, proxy: ProxyId);

    /// Ask the server to acknowledge `seq` once everything before it is
    /// processed. Returns the sequence number to wait for.
    fn sync(&mut self, seq: u32) -> Result<u32, TransportError>;

    /// `None` when the server refuses the object.
    fn create_object(
        &mut self,
        factory: &str,
        kind: ObjectType,
        props: &Properties,
    ) -> Option<ProxyId>;

    fn create_local_node(&mut self, props: &Properties) -> Option<NodeToken>;

    fn add_local_port(
        &mut self,
        node: NodeToken,
        direction: Direction,
        props: &Properties,
    ) -> Option<PortToken>;

    fn update_local_port(&mut self, node: NodeToken, port: PortToken, props: &Properties);

    fn remove_local_port(&mut self, node: NodeToken, port: PortToken);

    /// Connect a local node to the graph so the server assigns it an id.
    fn activate_local_node(&mut self, node: NodeToken) -> Result<(), TransportError>;

    fn destroy_local_node(&mut self, node: NodeToken);

    /// [`UNASSIGNED_NODE_ID`] until the server has assigned one.
    fn assigned_node_id(&self, node: NodeToken) -> u32;

    /// Run one loop iteration: wait up to `timeout` for events and append
    /// everything pending to `events`.
    fn drive_once(
        &mut self,
        timeout: Duration,
        events: &mut Vec<TransportEvent>,
    ) -> Result<(), TransportError>;

    /// Descriptor a host poll loop can watch for this connection.
    #[cfg(unix)]
    fn poll_fd(&self) -> Option<std::os::fd::RawFd> {
        None
    }

    fn disconnect(&mut self);
}

/// A family of transports sharing process-wide runtime state.
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    /// Process-wide setup, run once per [`Instance`].
    fn init(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn deinit(&self) {}

    fn connect(&self, config: &ClientConfig) -> Result<Box<dyn Transport>, TransportError>;
}

/// Shared runtime token.
///
/// Clients hold it through an `Arc`; the backend is torn down when the last
/// client releases it. Independent instances may coexist.
pub struct Instance {
    backend: Box<dyn Backend>,
}

impl Instance {
    pub fn new(backend: impl Backend + 'static) -> Result<Arc<Self>, TransportError> {
        backend.init()?;
        debug!(backend = backend.name(), "runtime initialized");
        Ok(Arc::new(Self {
            backend: Box::new(backend),
        }))
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub(crate) fn connect(
        &self,
        config: &ClientConfig,
    ) -> Result<Box<dyn Transport>, TransportError> {
        self.backend.connect(config)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        self.backend.deinit();
        debug!(backend = self.backend.name(), "runtime released");
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("backend", &self.backend.name())
            .finish()
    }
}
