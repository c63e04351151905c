//! Event subscriber: the only writer of the graph mirror.
//!
//! Lifecycle of a port:
//! - `Global { kind: Port }` binds a proxy and subscribes to its info. The
//!   mirror is not touched yet.
//! - `PortInfo` parses the properties and files the record in the mirror.
//! - `GlobalRemoved` drops the record and destroys the proxy.
//!
//! Every mirror mutation that adds, replaces or drops a record is queued as a
//! [`GraphChange`] for the owning client to hand to its observers. Ports that
//! never land in the mirror produce no change.

use crate::error::Result;
use crate::transport::{ObjectType, ProxyId, Transport, TransportError, TransportEvent};
use parking_lot::RwLock;
use patchbay_graph::{Graph, PortInfo, Properties};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Uninitialized,
    Listening,
    Closed,
}

/// A mirror mutation, as seen by observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphChange {
    /// A port landed in the mirror for the first time.
    Added(PortInfo),
    /// A mirrored port received new info and stayed in the mirror.
    Updated { previous: PortInfo, current: PortInfo },
    /// A mirrored port left: removed by the server, or re-described into
    /// something unclassifiable.
    Removed(PortInfo),
}

impl GraphChange {
    /// The port as it is after the change, or as it was when removed.
    pub fn port(&self) -> &PortInfo {
        match self {
            GraphChange::Added(port) | GraphChange::Removed(port) => port,
            GraphChange::Updated { current, .. } => current,
        }
    }
}

pub struct EventSubscriber {
    state: SubscriberState,
    /// Port id -> proxy bound to it. At most one entry per live port.
    listened: HashMap<u32, ProxyId>,
    graph: Arc<RwLock<Graph>>,
    changes: Vec<GraphChange>,
}

impl EventSubscriber {
    pub fn new(graph: Arc<RwLock<Graph>>) -> Self {
        Self {
            state: SubscriberState::Uninitialized,
            listened: HashMap::new(),
            graph,
            changes: Vec::new(),
        }
    }

    pub fn state(&self) -> SubscriberState {
        self.state
    }

    pub fn start(&mut self, transport: &mut dyn Transport) -> std::result::Result<(), TransportError> {
        if self.state != SubscriberState::Uninitialized {
            return Ok(());
        }
        transport.subscribe_globals()?;
        self.state = SubscriberState::Listening;
        debug!("listening for graph events");
        Ok(())
    }

    /// Apply one server event. Sync acknowledgements are not handled here.
    pub fn handle(&mut self, transport: &mut dyn Transport, event: TransportEvent) -> Result<()> {
        if self.state != SubscriberState::Listening {
            trace!(?event, "subscriber not listening, event ignored");
            return Ok(());
        }
        match event {
            TransportEvent::Global { id, kind } => self.on_global(transport, id, kind),
            TransportEvent::PortInfo { id, props } => return self.on_port_info(id, &props),
            TransportEvent::GlobalRemoved { id } => self.on_global_removed(transport, id),
            TransportEvent::Done { .. } => {}
        }
        Ok(())
    }

    fn on_global(&mut self, transport: &mut dyn Transport, id: u32, kind: ObjectType) {
        if kind != ObjectType::Port {
            return;
        }
        if let Some(stale) = self.listened.remove(&id) {
            warn!(port = id, "port announced twice, rebinding");
            transport.destroy_proxy(stale);
        }
        let Some(proxy) = transport.bind_object(id, kind) else {
            debug!(port = id, "port vanished before bind");
            return;
        };
        transport.subscribe_object_info(proxy);
        self.listened.insert(id, proxy);
        trace!(port = id, "port appeared");
    }

    fn on_port_info(&mut self, id: u32, props: &Properties) -> Result<()> {
        if !self.listened.contains_key(&id) {
            trace!(port = id, "info for unbound port ignored");
            return Ok(());
        }
        let port = PortInfo::from_properties(id, props);
        let current = port.clone();
        let (previous, landed) = {
            let mut graph = self.graph.write();
            let previous = graph.find_port(id).map(|(_, p)| p.clone());
            match graph.insert_port(port) {
                Ok(landed) => (previous, landed.is_some()),
                Err(e) => {
                    warn!(port = id, error = %e, "malformed port info");
                    return Err(e.into());
                }
            }
        };
        let change = match (previous, landed) {
            (None, true) => GraphChange::Added(current),
            (Some(previous), true) => GraphChange::Updated { previous, current },
            (Some(previous), false) => GraphChange::Removed(previous),
            (None, false) => return Ok(()),
        };
        self.changes.push(change);
        Ok(())
    }

    fn on_global_removed(&mut self, transport: &mut dyn Transport, id: u32) {
        let removed = self.graph.write().remove_port(id);
        if let Some(port) = removed {
            self.changes.push(GraphChange::Removed(port));
        }
        if let Some(proxy) = self.listened.remove(&id) {
            transport.destroy_proxy(proxy);
            trace!(port = id, "port removed");
        }
    }

    /// Unsubscribe and release every proxy. Safe to call repeatedly and
    /// before [`start`](Self::start).
    pub fn teardown(&mut self, transport: &mut dyn Transport) {
        if self.state == SubscriberState::Listening {
            transport.unsubscribe_globals();
        }
        for (_, proxy) in self.listened.drain() {
            transport.destroy_proxy(proxy);
        }
        if self.state != SubscriberState::Closed {
            debug!("graph subscription closed");
        }
        self.state = SubscriberState::Closed;
    }

    /// Take every change queued since the last call, oldest first.
    pub fn drain_changes(&mut self) -> std::vec::Drain<'_, GraphChange> {
        self.changes.drain(..)
    }

    pub fn listened_count(&self) -> usize {
        self.listened.len()
    }

    pub fn is_listening_to(&self, port_id: u32) -> bool {
        self.listened.contains_key(&port_id)
    }
}

impl std::fmt::Debug for EventSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubscriber")
            .field("state", &self.state)
            .field("listened", &self.listened.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{NodeToken, PortToken, UNASSIGNED_NODE_ID};
    use patchbay_graph::{keys, properties, Category, Direction};
    use std::time::Duration;

    /// Records proxy traffic; binds always succeed.
    #[derive(Default)]
    struct StubTransport {
        subscribed: bool,
        next_proxy: u32,
        bound: Vec<(u32, ProxyId)>,
        info: Vec<ProxyId>,
        destroyed: Vec<ProxyId>,
    }

    impl Transport for StubTransport {
        fn subscribe_globals(&mut self) -> std::result::Result<(), TransportError> {
            self.subscribed = true;
            Ok(())
        }
        fn unsubscribe_globals(&mut self) {
            self.subscribed = false;
        }
        fn bind_object(&mut self, id: u32, _kind: ObjectType) -> Option<ProxyId> {
            self.next_proxy += 1;
            let proxy = ProxyId(self.next_proxy);
            self.bound.push((id, proxy));
            Some(proxy)
        }
        fn subscribe_object_info(&mut self, proxy: ProxyId) {
            self.info.push(proxy);
        }
        fn destroy_proxy(&mut self, proxy: ProxyId) {
            self.destroyed.push(proxy);
        }
        fn sync(&mut self, seq: u32) -> std::result::Result<u32, TransportError> {
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
            Err(TransportError::Rejected("stub".into()))
        }
        fn destroy_local_node(&mut self, _: NodeToken) {}
        fn assigned_node_id(&self, _: NodeToken) -> u32 {
            UNASSIGNED_NODE_ID
        }
        fn drive_once(
            &mut self,
            _: Duration,
            _: &mut Vec<TransportEvent>,
        ) -> std::result::Result<(), TransportError> {
            Ok(())
        }
        fn disconnect(&mut self) {}
    }

    fn midi_props(node: &str) -> Properties {
        properties! {
            keys::NODE_ID => node,
            keys::PORT_DIRECTION => "out",
            keys::FORMAT_DSP => "8 bit raw midi",
            keys::PORT_PHYSICAL => "true",
        }
    }

    fn listening() -> (EventSubscriber, StubTransport, Arc<RwLock<Graph>>) {
        let graph = Arc::new(RwLock::new(Graph::new()));
        let mut subscriber = EventSubscriber::new(graph.clone());
        let mut transport = StubTransport::default();
        subscriber.start(&mut transport).unwrap();
        (subscriber, transport, graph)
    }

    #[test]
    fn test_appeared_binds_without_mirroring() {
        let (mut sub, mut transport, graph) = listening();
        sub.handle(&mut transport, TransportEvent::Global { id: 5, kind: ObjectType::Port })
            .unwrap();

        assert!(sub.is_listening_to(5));
        assert_eq!(transport.bound, vec![(5, ProxyId(1))]);
        assert_eq!(transport.info, vec![ProxyId(1)]);
        assert!(graph.read().is_empty());
    }

    #[test]
    fn test_non_port_globals_ignored() {
        let (mut sub, mut transport, _graph) = listening();
        sub.handle(&mut transport, TransportEvent::Global { id: 2, kind: ObjectType::Node })
            .unwrap();
        assert_eq!(sub.listened_count(), 0);
        assert!(transport.bound.is_empty());
    }

    #[test]
    fn test_info_then_removed() {
        let (mut sub, mut transport, graph) = listening();
        sub.handle(&mut transport, TransportEvent::Global { id: 5, kind: ObjectType::Port })
            .unwrap();
        sub.handle(&mut transport, TransportEvent::PortInfo { id: 5, props: midi_props("10") })
            .unwrap();
        assert_eq!(
            graph.read().ports(Category::PhysicalMidi, 10, Direction::Output).len(),
            1
        );

        sub.handle(&mut transport, TransportEvent::GlobalRemoved { id: 5 })
            .unwrap();
        assert!(graph
            .read()
            .ports(Category::PhysicalMidi, 10, Direction::Output)
            .is_empty());
        assert_eq!(transport.destroyed, vec![ProxyId(1)]);
        assert!(!sub.is_listening_to(5));
    }

    #[test]
    fn test_info_for_unbound_port_ignored() {
        let (mut sub, mut transport, graph) = listening();
        sub.handle(&mut transport, TransportEvent::PortInfo { id: 8, props: midi_props("1") })
            .unwrap();
        assert!(graph.read().is_empty());
    }

    #[test]
    fn test_malformed_node_id_is_error() {
        let (mut sub, mut transport, graph) = listening();
        sub.handle(&mut transport, TransportEvent::Global { id: 5, kind: ObjectType::Port })
            .unwrap();
        let err = sub
            .handle(&mut transport, TransportEvent::PortInfo { id: 5, props: midi_props("1O") })
            .unwrap_err();
        assert_eq!(
            err,
            crate::Error::MalformedGraphEvent {
                port_id: 5,
                node_id: "1O".to_string()
            }
        );
        assert!(graph.read().is_empty());
    }

    #[test]
    fn test_duplicate_announce_rebinds_once() {
        let (mut sub, mut transport, _graph) = listening();
        for _ in 0..2 {
            sub.handle(&mut transport, TransportEvent::Global { id: 5, kind: ObjectType::Port })
                .unwrap();
        }
        assert_eq!(sub.listened_count(), 1);
        assert_eq!(transport.destroyed, vec![ProxyId(1)]);
    }

    #[test]
    fn test_removed_unknown_is_noop() {
        let (mut sub, mut transport, graph) = listening();
        sub.handle(&mut transport, TransportEvent::GlobalRemoved { id: 77 })
            .unwrap();
        assert!(transport.destroyed.is_empty());
        assert!(graph.read().is_empty());
    }

    #[test]
    fn test_teardown_idempotent() {
        let (mut sub, mut transport, _graph) = listening();
        sub.handle(&mut transport, TransportEvent::Global { id: 1, kind: ObjectType::Port })
            .unwrap();
        sub.handle(&mut transport, TransportEvent::Global { id: 2, kind: ObjectType::Port })
            .unwrap();

        sub.teardown(&mut transport);
        assert!(!transport.subscribed);
        assert_eq!(transport.destroyed.len(), 2);
        assert_eq!(sub.state(), SubscriberState::Closed);

        sub.teardown(&mut transport);
        assert_eq!(transport.destroyed.len(), 2);

        // Events after teardown are ignored.
        sub.handle(&mut transport, TransportEvent::Global { id: 3, kind: ObjectType::Port })
            .unwrap();
        assert_eq!(sub.listened_count(), 0);
    }

    #[test]
    fn test_changes_follow_mirror() {
        let (mut sub, mut transport, _graph) = listening();
        sub.handle(&mut transport, TransportEvent::Global { id: 5, kind: ObjectType::Port })
            .unwrap();
        assert_eq!(sub.drain_changes().count(), 0);

        sub.handle(&mut transport, TransportEvent::PortInfo { id: 5, props: midi_props("10") })
            .unwrap();
        let added: Vec<_> = sub.drain_changes().collect();
        assert!(matches!(added.as_slice(), [GraphChange::Added(p)] if p.id == 5));

        sub.handle(&mut transport, TransportEvent::PortInfo { id: 5, props: midi_props("11") })
            .unwrap();
        let updated: Vec<_> = sub.drain_changes().collect();
        match updated.as_slice() {
            [GraphChange::Updated { previous, current }] => {
                assert_eq!(previous.node_id, "10");
                assert_eq!(current.node_id, "11");
            }
            other => panic!("unexpected changes: {other:?}"),
        }

        // Re-described as unclassifiable: the record leaves the mirror
        let mut video = midi_props("11");
        video.insert(keys::FORMAT_DSP, "32 bit float RGBA video");
        sub.handle(&mut transport, TransportEvent::PortInfo { id: 5, props: video })
            .unwrap();
        let removed: Vec<_> = sub.drain_changes().collect();
        assert!(matches!(removed.as_slice(), [GraphChange::Removed(p)] if p.node_id == "11"));

        // Nothing left to remove
        sub.handle(&mut transport, TransportEvent::GlobalRemoved { id: 5 })
            .unwrap();
        assert_eq!(sub.drain_changes().count(), 0);
    }

    #[test]
    fn test_dropped_ports_produce_no_changes() {
        let (mut sub, mut transport, _graph) = listening();
        sub.handle(&mut transport, TransportEvent::Global { id: 1, kind: ObjectType::Port })
            .unwrap();
        sub.handle(&mut transport, TransportEvent::PortInfo { id: 1, props: midi_props("") })
            .unwrap();
        sub.handle(&mut transport, TransportEvent::GlobalRemoved { id: 1 })
            .unwrap();
        assert_eq!(sub.drain_changes().count(), 0);
    }

    #[test]
    fn test_teardown_before_start() {
        let graph = Arc::new(RwLock::new(Graph::new()));
        let mut sub = EventSubscriber::new(graph);
        let mut transport = StubTransport::default();
        sub.teardown(&mut transport);
        assert_eq!(sub.state(), SubscriberState::Closed);
        assert!(transport.destroyed.is_empty());
    }
}
