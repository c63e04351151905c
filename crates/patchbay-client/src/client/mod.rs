//! Graph client: one connection to the graph server plus its mirror.
//!
//! ## Quick Start
//!
//! ```ignore
//! use patchbay_client::{GraphClient, Instance};
//!
//! let instance = Instance::new(backend)?;
//! let mut client = GraphClient::builder()
//!     .client_name("sequencer")
//!     .build(instance)?;
//!
//! // Mirror is populated once `build` returns
//! for port in client.list_ports(MediaKind::Midi, Direction::Output) {
//!     println!("{}", port.display_name());
//! }
//!
//! let link = client.create_link(out_port, in_port)?;
//! ```
//!
//! Every call that issues a request ends with a barrier, so its effect has
//! been applied (or has failed) by the time it returns.

mod builder;
mod reader;

pub use builder::GraphClientBuilder;
pub use reader::GraphReader;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::subscriber::{EventSubscriber, GraphChange};
use crate::sync::{SyncBarrier, SyncStats};
use crate::transport::{Instance, NodeToken, Transport, TransportError, TransportEvent};
use parking_lot::RwLock;
use patchbay_graph::{Category, Direction, Graph, MediaKind, PortInfo};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Callback told about every mirror change, on the thread driving the loop.
pub type GraphObserver = Box<dyn FnMut(&GraphChange) + Send>;

/// Connection handle and owner of the graph mirror.
///
/// Mutating calls take `&mut self`; sharing a client between threads needs an
/// outer mutex. Readers on other threads should use [`GraphClient::graph`].
pub struct GraphClient {
    pub(crate) instance: Arc<Instance>,
    pub(crate) transport: Option<Box<dyn Transport>>,
    pub(crate) subscriber: EventSubscriber,
    pub(crate) barrier: SyncBarrier,
    pub(crate) graph: Arc<RwLock<Graph>>,
    pub(crate) config: ClientConfig,
    pub(crate) poisoned: Option<Error>,
    events: Vec<TransportEvent>,
    observers: Vec<GraphObserver>,
    /// Local nodes still alive, destroyed on close.
    pub(crate) local_nodes: Vec<NodeToken>,
}

impl GraphClient {
    pub fn builder() -> GraphClientBuilder {
        GraphClientBuilder::default()
    }

    /// Connect, subscribe to the graph and wait for the initial snapshot.
    pub fn open(instance: Arc<Instance>, config: ClientConfig) -> Result<Self> {
        Self::open_with_observers(instance, config, Vec::new())
    }

    /// Like [`open`](Self::open), with observers registered before the
    /// initial snapshot so they hear about ports that already exist.
    pub(crate) fn open_with_observers(
        instance: Arc<Instance>,
        config: ClientConfig,
        observers: Vec<GraphObserver>,
    ) -> Result<Self> {
        let transport = instance
            .connect(&config)
            .map_err(|e| Error::TransportInitFailed(e.to_string()))?;

        let graph = Arc::new(RwLock::new(Graph::new()));
        let mut client = Self {
            instance,
            transport: Some(transport),
            subscriber: EventSubscriber::new(graph.clone()),
            barrier: SyncBarrier::new(),
            graph,
            config,
            poisoned: None,
            events: Vec::with_capacity(64),
            observers,
            local_nodes: Vec::new(),
        };

        if let Err(e) = client.start() {
            client.close();
            return Err(match e {
                Error::Transport(e) => Error::TransportInitFailed(e.to_string()),
                other => other,
            });
        }

        debug!(
            client = %client.config.client_name,
            backend = client.instance.backend_name(),
            ports = client.graph.read().port_count(),
            "graph client open"
        );
        Ok(client)
    }

    fn start(&mut self) -> Result<()> {
        let transport = self
            .transport
            .as_deref_mut()
            .ok_or(TransportError::Disconnected)?;
        self.subscriber.start(transport)?;
        // First round delivers the announcements. Binding them requests
        // info, which the second round flushes into the mirror.
        self.synchronize()?;
        self.synchronize()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    /// Whether a malformed server event has invalidated this client.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    pub(crate) fn check(&self) -> Result<()> {
        match &self.poisoned {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn poison_on<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e @ Error::MalformedGraphEvent { .. }) = &result {
            warn!(error = %e, "graph mirror poisoned");
            self.poisoned = Some(e.clone());
        }
        result
    }

    pub(crate) fn transport_mut(&mut self) -> Result<&mut dyn Transport> {
        match self.transport.as_deref_mut() {
            Some(transport) => Ok(transport),
            None => Err(TransportError::Disconnected.into()),
        }
    }

    pub(crate) fn transport_ref(&self) -> Option<&dyn Transport> {
        self.transport.as_deref()
    }

    // ==================== Event Loop ====================

    /// Drive the loop once and dispatch whatever arrived.
    pub fn pump(&mut self) -> Result<()> {
        self.check()?;
        let result = self.pump_inner();
        self.poison_on(result)
    }

    fn pump_inner(&mut self) -> Result<()> {
        let timeout = self.config.loop_timeout();
        let transport = self
            .transport
            .as_deref_mut()
            .ok_or(TransportError::Disconnected)?;

        self.events.clear();
        transport.drive_once(timeout, &mut self.events)?;
        self.barrier.record_iteration();

        let mut result = Ok(());
        for event in self.events.drain(..) {
            match event {
                TransportEvent::Done { seq } => {
                    self.barrier.acknowledge(seq);
                }
                other => {
                    if let Err(e) = self.subscriber.handle(transport, other) {
                        result = Err(e);
                        break;
                    }
                }
            }
        }
        // Changes applied before a failure still reached the mirror.
        self.notify_observers();
        result
    }

    fn notify_observers(&mut self) {
        for change in self.subscriber.drain_changes() {
            for observer in &mut self.observers {
                observer(&change);
            }
        }
    }

    /// Register a callback for every later mirror change.
    pub fn add_observer(&mut self, observer: impl FnMut(&GraphChange) + Send + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Block until the server has processed every request issued so far.
    ///
    /// The calling thread becomes the loop driver; every event that arrives
    /// meanwhile is applied to the mirror. There is no timeout.
    pub fn synchronize(&mut self) -> Result<()> {
        self.check()?;
        let result = self.synchronize_inner();
        self.poison_on(result)
    }

    fn synchronize_inner(&mut self) -> Result<()> {
        let seq = self.barrier.next_sequence();
        let seq = self.transport_mut()?.sync(seq)?;
        self.barrier.begin(seq);
        while !self.barrier.is_complete() {
            self.pump_inner()?;
        }
        Ok(())
    }

    pub fn sync_stats(&self) -> SyncStats {
        self.barrier.stats()
    }

    /// Descriptor for a host poll loop. `None` if the backend has none or
    /// the client is closed or poisoned.
    #[cfg(unix)]
    pub fn poll_fd(&self) -> Option<std::os::fd::RawFd> {
        if self.poisoned.is_some() {
            return None;
        }
        self.transport.as_deref().and_then(|t| t.poll_fd())
    }

    // ==================== Graph Queries ====================

    /// Read-only handle to the mirror, usable from other threads.
    pub fn graph(&self) -> GraphReader {
        GraphReader::new(self.graph.clone())
    }

    /// Ports of node `node_id`, direction `direction`, within `category`.
    pub fn ports(&self, category: Category, node_id: u32, direction: Direction) -> Vec<PortInfo> {
        self.graph.read().ports(category, node_id, direction).to_vec()
    }

    /// Visit every mirrored port. The mirror is read-locked for the duration.
    pub fn for_each_port(&self, f: impl FnMut(&PortInfo)) {
        self.graph.read().for_each_port(f);
    }

    pub fn list_ports(&self, kind: MediaKind, direction: Direction) -> Vec<PortInfo> {
        self.graph
            .read()
            .list_ports(kind, direction)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn find_port(&self, id: u32) -> Option<PortInfo> {
        self.graph.read().find_port(id).map(|(_, p)| p.clone())
    }

    // ==================== Teardown ====================

    /// Release every proxy and local node, then disconnect. Idempotent.
    pub fn close(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        self.subscriber.teardown(&mut *transport);
        for node in self.local_nodes.drain(..) {
            transport.destroy_local_node(node);
        }
        transport.disconnect();
        trace!(client = %self.config.client_name, "graph client closed");
    }
}

impl Drop for GraphClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for GraphClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphClient")
            .field("client_name", &self.config.client_name)
            .field("backend", &self.instance.backend_name())
            .field("open", &self.transport.is_some())
            .field("poisoned", &self.poisoned.is_some())
            .field("subscriber", &self.subscriber)
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::transport::{Backend, ObjectType, PortToken, ProxyId};
    use parking_lot::Mutex;
    use patchbay_graph::{keys, properties, Properties};
    use std::os::fd::RawFd;
    use std::time::Duration;

    const FD: RawFd = 7;

    type Queue = Arc<Mutex<Vec<TransportEvent>>>;

    /// Loopback transport with a fixed descriptor. Syncs are acknowledged
    /// behind whatever the test queued.
    struct FdTransport {
        queue: Queue,
        next_proxy: u32,
    }

    impl Transport for FdTransport {
        fn subscribe_globals(&mut self) -> std::result::Result<(), TransportError> {
            Ok(())
        }
        fn unsubscribe_globals(&mut self) {}
        fn bind_object(&mut self, _: u32, _: ObjectType) -> Option<ProxyId> {
            self.next_proxy += 1;
            Some(ProxyId(self.next_proxy))
        }
        fn subscribe_object_info(&mut self, _: ProxyId) {}
        fn destroy_proxy(&mut self, _: ProxyId) {}
        fn sync(&mut self, seq: u32) -> std::result::Result<u32, TransportError> {
            self.queue.lock().push(TransportEvent::Done { seq });
            Ok(seq)
        }
        fn create_object(&mut self, _: &str, _: ObjectType, _: &Properties) -> Option<ProxyId> {
            None
        }
        fn create_local_node(&mut self, _: &Properties) -> Option<NodeToken> {
            None
        }
        fn add_local_port(&mut self, _: NodeToken, _: Direction, _: &Properties) -> Option<PortToken> {
            None
        }
        fn update_local_port(&mut self, _: NodeToken, _: PortToken, _: &Properties) {}
        fn remove_local_port(&mut self, _: NodeToken, _: PortToken) {}
        fn activate_local_node(&mut self, _: NodeToken) -> std::result::Result<(), TransportError> {
            Ok(())
        }
        fn destroy_local_node(&mut self, _: NodeToken) {}
        fn assigned_node_id(&self, _: NodeToken) -> u32 {
            crate::transport::UNASSIGNED_NODE_ID
        }
        fn drive_once(
            &mut self,
            _: Duration,
            events: &mut Vec<TransportEvent>,
        ) -> std::result::Result<(), TransportError> {
            events.append(&mut self.queue.lock());
            Ok(())
        }
        fn poll_fd(&self) -> Option<RawFd> {
            Some(FD)
        }
        fn disconnect(&mut self) {}
    }

    struct FdBackend {
        queue: Queue,
    }

    impl Backend for FdBackend {
        fn name(&self) -> &str {
            "fd"
        }
        fn connect(
            &self,
            _: &ClientConfig,
        ) -> std::result::Result<Box<dyn Transport>, TransportError> {
            Ok(Box::new(FdTransport {
                queue: self.queue.clone(),
                next_proxy: 0,
            }))
        }
    }

    fn open_fd_client() -> (GraphClient, Queue) {
        let queue = Queue::default();
        let instance = Instance::new(FdBackend {
            queue: queue.clone(),
        })
        .unwrap();
        let client = GraphClient::open(instance, ClientConfig::default()).unwrap();
        (client, queue)
    }

    #[test]
    fn test_poll_fd_passes_through_while_healthy() {
        let (mut client, _queue) = open_fd_client();
        assert_eq!(client.poll_fd(), Some(FD));
        client.synchronize().unwrap();
        assert_eq!(client.poll_fd(), Some(FD));
    }

    #[test]
    fn test_poll_fd_none_after_poison() {
        let (mut client, queue) = open_fd_client();
        queue.lock().extend([
            TransportEvent::Global {
                id: 3,
                kind: ObjectType::Port,
            },
            TransportEvent::PortInfo {
                id: 3,
                props: properties! {
                    keys::NODE_ID => "x1",
                    keys::FORMAT_DSP => "8 bit raw midi",
                },
            },
        ]);
        assert!(matches!(
            client.synchronize(),
            Err(Error::MalformedGraphEvent { port_id: 3, .. })
        ));
        assert!(client.is_poisoned());
        assert_eq!(client.poll_fd(), None);
    }

    #[test]
    fn test_poll_fd_none_after_close() {
        let (mut client, _queue) = open_fd_client();
        client.close();
        assert_eq!(client.poll_fd(), None);
    }

    #[test]
    fn test_observers_hear_changes_in_order() {
        let (mut client, queue) = open_fd_client();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        client.add_observer(move |change| sink.lock().push(change.clone()));

        let midi = |node: &str| {
            properties! {
                keys::NODE_ID => node,
                keys::FORMAT_DSP => "8 bit raw midi",
                keys::PORT_DIRECTION => "out",
            }
        };
        queue.lock().extend([
            TransportEvent::Global {
                id: 9,
                kind: ObjectType::Port,
            },
            TransportEvent::PortInfo {
                id: 9,
                props: midi("4"),
            },
            TransportEvent::PortInfo {
                id: 9,
                props: midi("5"),
            },
            TransportEvent::GlobalRemoved { id: 9 },
        ]);
        client.synchronize().unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert!(matches!(&seen[0], GraphChange::Added(p) if p.node_id == "4"));
        assert!(matches!(&seen[1], GraphChange::Updated { current, .. } if current.node_id == "5"));
        assert!(matches!(&seen[2], GraphChange::Removed(p) if p.id == 9));
    }
}
