//! In-process graph server.
//!
//! [`MemoryServer`] keeps a complete graph (ports, nodes, links) in memory and
//! speaks the [`Transport`] protocol to any number of connections, each with
//! its own event queue. Tests and demos drive it directly: announce ports,
//! change their properties, remove them, or flip policy knobs to make the
//! server refuse links or never assign node ids.
//!
//! Events for one connection are delivered in the order they were produced,
//! so a sync acknowledgement always arrives after everything queued before it.

use crate::config::ClientConfig;
use crate::transport::{
    Backend, NodeToken, ObjectType, PortToken, ProxyId, Transport, TransportError,
    TransportEvent, LINK_FACTORY, UNASSIGNED_NODE_ID,
};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use patchbay_graph::{keys, Direction, Properties};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// First id handed out to server objects.
const FIRST_OBJECT_ID: u32 = 32;

#[derive(Debug, Clone)]
struct Global {
    kind: ObjectType,
    props: Properties,
    /// Connection that created the object, for cleanup on disconnect.
    owner: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
struct Proxy {
    global: u32,
    info: bool,
    /// Created (not merely bound) by the connection; destroying it removes
    /// the object.
    owned: bool,
}

#[derive(Debug)]
struct LocalPortState {
    token: PortToken,
    direction: Direction,
    props: Properties,
    global: Option<u32>,
}

#[derive(Debug)]
struct LocalNodeState {
    props: Properties,
    ports: Vec<LocalPortState>,
    active: bool,
    node_id: Option<u32>,
}

#[derive(Debug)]
struct Connection {
    name: String,
    tx: Sender<TransportEvent>,
    subscribed: bool,
    proxies: HashMap<ProxyId, Proxy>,
    nodes: BTreeMap<NodeToken, LocalNodeState>,
    next_handle: u32,
}

impl Connection {
    fn next_handle(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }

    fn send(&self, event: TransportEvent) {
        // Receiver gone means the client dropped without disconnecting.
        let _ = self.tx.send(event);
    }
}

#[derive(Debug, Clone, Copy)]
struct Policy {
    refuse_connections: bool,
    reject_links: bool,
    allow_duplicate_links: bool,
    assign_node_ids: bool,
    publish_local_ports: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            refuse_connections: false,
            reject_links: false,
            allow_duplicate_links: true,
            assign_node_ids: true,
            publish_local_ports: true,
        }
    }
}

#[derive(Debug)]
struct ServerState {
    next_id: u32,
    globals: BTreeMap<u32, Global>,
    connections: HashMap<u32, Connection>,
    next_connection: u32,
    policy: Policy,
    sync_requests: u64,
    inits: u64,
    deinits: u64,
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            next_id: FIRST_OBJECT_ID,
            globals: BTreeMap::new(),
            connections: HashMap::new(),
            next_connection: 0,
            policy: Policy::default(),
            sync_requests: 0,
            inits: 0,
            deinits: 0,
        }
    }
}

impl ServerState {
    /// Next free id. Wraps back to the first id and never yields
    /// [`UNASSIGNED_NODE_ID`].
    fn allocate_id(&mut self) -> u32 {
        loop {
            let id = self.next_id;
            self.next_id = if id >= UNASSIGNED_NODE_ID - 1 {
                FIRST_OBJECT_ID
            } else {
                id + 1
            };
            if id != UNASSIGNED_NODE_ID && !self.globals.contains_key(&id) {
                return id;
            }
        }
    }

    fn insert_global(&mut self, id: u32, global: Global) {
        let kind = global.kind;
        if self.globals.insert(id, global).is_some() {
            self.broadcast(TransportEvent::GlobalRemoved { id });
        }
        if id >= self.next_id {
            self.next_id = id.saturating_add(1);
        }
        self.broadcast(TransportEvent::Global { id, kind });
    }

    fn remove_global(&mut self, id: u32) -> Option<Global> {
        let global = self.globals.remove(&id)?;
        self.broadcast(TransportEvent::GlobalRemoved { id });
        Some(global)
    }

    fn broadcast(&self, event: TransportEvent) {
        for conn in self.connections.values().filter(|c| c.subscribed) {
            conn.send(event.clone());
        }
    }

    /// Send fresh info for port `id` to every proxy listening on it.
    fn send_port_info(&self, id: u32) {
        let Some(global) = self.globals.get(&id) else {
            return;
        };
        for conn in self.connections.values() {
            let listening = conn
                .proxies
                .values()
                .filter(|p| p.global == id && p.info)
                .count();
            for _ in 0..listening {
                conn.send(TransportEvent::PortInfo {
                    id,
                    props: global.props.clone(),
                });
            }
        }
    }

    fn link_exists(&self, output: u32, input: u32) -> bool {
        self.globals.values().any(|g| {
            g.kind == ObjectType::Link
                && g.props.get(keys::LINK_OUTPUT_PORT) == Some(output.to_string().as_str())
                && g.props.get(keys::LINK_INPUT_PORT) == Some(input.to_string().as_str())
        })
    }

    fn port_direction(&self, id: u32) -> Option<Direction> {
        self.globals
            .get(&id)
            .filter(|g| g.kind == ObjectType::Port)
            .map(|g| {
                g.props
                    .get(keys::PORT_DIRECTION)
                    .map(Direction::from_property)
                    .unwrap_or_default()
            })
    }

    fn create_link(&mut self, conn_id: u32, props: &Properties) -> Option<ProxyId> {
        if self.policy.reject_links {
            return None;
        }
        let output = props.get(keys::LINK_OUTPUT_PORT)?.parse::<u32>().ok()?;
        let input = props.get(keys::LINK_INPUT_PORT)?.parse::<u32>().ok()?;
        if self.port_direction(output) != Some(Direction::Output)
            || self.port_direction(input) != Some(Direction::Input)
        {
            debug!(output, input, "link refused: endpoints are not an output/input pair");
            return None;
        }
        if !self.policy.allow_duplicate_links && self.link_exists(output, input) {
            debug!(output, input, "link refused: duplicate");
            return None;
        }

        let id = self.allocate_id();
        self.insert_global(
            id,
            Global {
                kind: ObjectType::Link,
                props: props.clone(),
                owner: Some(conn_id),
            },
        );
        let conn = self.connections.get_mut(&conn_id)?;
        let proxy = ProxyId(conn.next_handle());
        conn.proxies.insert(
            proxy,
            Proxy {
                global: id,
                info: false,
                owned: true,
            },
        );
        Some(proxy)
    }

    /// Give `token` a node id and announce its ports, if policy allows.
    fn assign_node(&mut self, conn_id: u32, token: NodeToken) {
        if !self.policy.assign_node_ids {
            return;
        }
        let props = match self.connections.get(&conn_id).and_then(|c| c.nodes.get(&token)) {
            Some(node) if node.active && node.node_id.is_none() => node.props.clone(),
            _ => return,
        };
        let node_id = self.allocate_id();
        self.insert_global(
            node_id,
            Global {
                kind: ObjectType::Node,
                props,
                owner: Some(conn_id),
            },
        );
        if let Some(node) = self
            .connections
            .get_mut(&conn_id)
            .and_then(|c| c.nodes.get_mut(&token))
        {
            node.node_id = Some(node_id);
        }
        trace!(node_id, "local node assigned");
        self.publish_local_ports(conn_id, token);
    }

    fn publish_local_ports(&mut self, conn_id: u32, token: NodeToken) {
        if !self.policy.publish_local_ports {
            return;
        }
        let pending: Vec<(usize, Properties)> = match self
            .connections
            .get(&conn_id)
            .and_then(|c| c.nodes.get(&token))
        {
            Some(LocalNodeState {
                node_id: Some(node_id),
                ports,
                ..
            }) => ports
                .iter()
                .enumerate()
                .filter(|(_, p)| p.global.is_none())
                .map(|(index, p)| {
                    let mut props = p.props.clone();
                    props.insert(keys::NODE_ID, node_id.to_string());
                    props.insert(keys::PORT_DIRECTION, p.direction.as_property());
                    props.insert(keys::PORT_ID, index.to_string());
                    (index, props)
                })
                .collect(),
            _ => return,
        };

        for (index, props) in pending {
            let id = self.allocate_id();
            self.insert_global(
                id,
                Global {
                    kind: ObjectType::Port,
                    props,
                    owner: Some(conn_id),
                },
            );
            if let Some(port) = self
                .connections
                .get_mut(&conn_id)
                .and_then(|c| c.nodes.get_mut(&token))
                .and_then(|n| n.ports.get_mut(index))
            {
                port.global = Some(id);
            }
        }
    }

    fn destroy_node(&mut self, conn_id: u32, token: NodeToken) {
        let Some(node) = self
            .connections
            .get_mut(&conn_id)
            .and_then(|c| c.nodes.remove(&token))
        else {
            return;
        };
        for id in node.ports.iter().filter_map(|p| p.global) {
            self.remove_global(id);
        }
        if let Some(id) = node.node_id {
            self.remove_global(id);
        }
    }

    fn drop_connection(&mut self, conn_id: u32) {
        let tokens: Vec<NodeToken> = match self.connections.get(&conn_id) {
            Some(conn) => conn.nodes.keys().copied().collect(),
            None => return,
        };
        for token in tokens {
            self.destroy_node(conn_id, token);
        }
        let owned: Vec<u32> = self
            .globals
            .iter()
            .filter(|(_, g)| g.owner == Some(conn_id))
            .map(|(id, _)| *id)
            .collect();
        for id in owned {
            self.remove_global(id);
        }
        if let Some(conn) = self.connections.remove(&conn_id) {
            debug!(connection = %conn.name, "client disconnected");
        }
    }
}

/// Handle to a shared in-memory graph server. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that connects clients to this server.
    pub fn backend(&self) -> MemoryBackend {
        MemoryBackend {
            server: self.clone(),
        }
    }

    // ==================== Graph Injection ====================

    /// Announce a port with a server-chosen id.
    pub fn add_port(&self, props: Properties) -> u32 {
        self.add_object(ObjectType::Port, props)
    }

    /// Announce a port with a fixed id, replacing any object with that id.
    /// Returns `false` for [`UNASSIGNED_NODE_ID`], which is never a valid id.
    pub fn add_port_with_id(&self, id: u32, props: Properties) -> bool {
        self.add_object_with_id(id, ObjectType::Port, props)
    }

    pub fn add_object(&self, kind: ObjectType, props: Properties) -> u32 {
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.insert_global(
            id,
            Global {
                kind,
                props,
                owner: None,
            },
        );
        id
    }

    pub fn add_object_with_id(&self, id: u32, kind: ObjectType, props: Properties) -> bool {
        if id == UNASSIGNED_NODE_ID {
            return false;
        }
        self.state.lock().insert_global(
            id,
            Global {
                kind,
                props,
                owner: None,
            },
        );
        true
    }

    /// Replace a port's properties and resend its info to bound proxies.
    /// Returns `false` if no such port exists.
    pub fn update_port(&self, id: u32, props: Properties) -> bool {
        let mut state = self.state.lock();
        match state.globals.get_mut(&id) {
            Some(global) if global.kind == ObjectType::Port => global.props = props,
            _ => return false,
        }
        state.send_port_info(id);
        true
    }

    /// Remove any object. Returns `false` if it did not exist.
    pub fn remove_object(&self, id: u32) -> bool {
        self.state.lock().remove_global(id).is_some()
    }

    /// Assign ids to activated local nodes that are still waiting for one.
    pub fn assign_pending_nodes(&self) {
        let mut state = self.state.lock();
        let pending: Vec<(u32, NodeToken)> = state
            .connections
            .iter()
            .flat_map(|(conn_id, conn)| conn.nodes.keys().map(move |token| (*conn_id, *token)))
            .collect();
        for (conn_id, token) in pending {
            state.assign_node(conn_id, token);
        }
    }

    /// Drop every connection; clients see [`TransportError::Disconnected`].
    pub fn disconnect_all(&self) {
        let mut state = self.state.lock();
        let ids: Vec<u32> = state.connections.keys().copied().collect();
        for id in ids {
            state.drop_connection(id);
        }
    }

    // ==================== Policy ====================

    pub fn set_refuse_connections(&self, refuse: bool) {
        self.state.lock().policy.refuse_connections = refuse;
    }

    pub fn set_reject_links(&self, reject: bool) {
        self.state.lock().policy.reject_links = reject;
    }

    pub fn set_allow_duplicate_links(&self, allow: bool) {
        self.state.lock().policy.allow_duplicate_links = allow;
    }

    pub fn set_assign_node_ids(&self, assign: bool) {
        self.state.lock().policy.assign_node_ids = assign;
    }

    pub fn set_publish_local_ports(&self, publish: bool) {
        self.state.lock().policy.publish_local_ports = publish;
    }

    // ==================== Introspection ====================

    /// `(output, input)` port pairs of every link.
    pub fn links(&self) -> Vec<(u32, u32)> {
        let state = self.state.lock();
        state
            .globals
            .values()
            .filter(|g| g.kind == ObjectType::Link)
            .filter_map(|g| {
                let output = g.props.get(keys::LINK_OUTPUT_PORT)?.parse().ok()?;
                let input = g.props.get(keys::LINK_INPUT_PORT)?.parse().ok()?;
                Some((output, input))
            })
            .collect()
    }

    pub fn object_kind(&self, id: u32) -> Option<ObjectType> {
        self.state.lock().globals.get(&id).map(|g| g.kind)
    }

    pub fn object_properties(&self, id: u32) -> Option<Properties> {
        self.state.lock().globals.get(&id).map(|g| g.props.clone())
    }

    /// Ids of every port, ascending.
    pub fn port_ids(&self) -> Vec<u32> {
        self.state
            .lock()
            .globals
            .iter()
            .filter(|(_, g)| g.kind == ObjectType::Port)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn sync_requests(&self) -> u64 {
        self.state.lock().sync_requests
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Live proxies held by all connections.
    pub fn proxy_count(&self) -> usize {
        self.state
            .lock()
            .connections
            .values()
            .map(|c| c.proxies.len())
            .sum()
    }

    /// `(init, deinit)` calls seen by backends of this server.
    pub fn runtime_calls(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.inits, state.deinits)
    }
}

impl std::fmt::Debug for MemoryServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryServer")
            .field("objects", &state.globals.len())
            .field("connections", &state.connections.len())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct MemoryBackend {
    server: MemoryServer,
}

impl MemoryBackend {
    pub fn new(server: MemoryServer) -> Self {
        Self { server }
    }

    pub fn server(&self) -> &MemoryServer {
        &self.server
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn init(&self) -> Result<(), TransportError> {
        self.server.state.lock().inits += 1;
        Ok(())
    }

    fn deinit(&self) {
        self.server.state.lock().deinits += 1;
    }

    fn connect(&self, config: &ClientConfig) -> Result<Box<dyn Transport>, TransportError> {
        let mut state = self.server.state.lock();
        if state.policy.refuse_connections {
            return Err(TransportError::ConnectFailed(
                "server refused connection".to_string(),
            ));
        }
        state.next_connection += 1;
        let id = state.next_connection;
        let (tx, rx) = crossbeam_channel::unbounded();
        state.connections.insert(
            id,
            Connection {
                name: config.client_name.clone(),
                tx,
                subscribed: false,
                proxies: HashMap::new(),
                nodes: BTreeMap::new(),
                next_handle: 0,
            },
        );
        debug!(connection = %config.client_name, id, "client connected");
        Ok(Box::new(MemoryTransport {
            server: self.server.clone(),
            id,
            rx,
            connected: true,
        }))
    }
}

/// One client connection to a [`MemoryServer`].
pub struct MemoryTransport {
    server: MemoryServer,
    id: u32,
    rx: Receiver<TransportEvent>,
    connected: bool,
}

impl MemoryTransport {
    fn with_connection<R>(&self, f: impl FnOnce(&mut ServerState, u32) -> Option<R>) -> Option<R> {
        let mut state = self.server.state.lock();
        if !state.connections.contains_key(&self.id) {
            return None;
        }
        f(&mut *state, self.id)
    }
}

impl Transport for MemoryTransport {
    fn subscribe_globals(&mut self) -> Result<(), TransportError> {
        self.with_connection(|state, id| {
            let conn = state.connections.get_mut(&id)?;
            conn.subscribed = true;
            // New subscribers first hear about everything already present.
            for (&gid, global) in &state.globals {
                conn.send(TransportEvent::Global {
                    id: gid,
                    kind: global.kind,
                });
            }
            Some(())
        })
        .ok_or(TransportError::Disconnected)
    }

    fn unsubscribe_globals(&mut self) {
        self.with_connection(|state, id| {
            state.connections.get_mut(&id)?.subscribed = false;
            Some(())
        });
    }

    fn bind_object(&mut self, object: u32, kind: ObjectType) -> Option<ProxyId> {
        self.with_connection(|state, id| {
            if state.globals.get(&object)?.kind != kind {
                return None;
            }
            let conn = state.connections.get_mut(&id)?;
            let proxy = ProxyId(conn.next_handle());
            conn.proxies.insert(
                proxy,
                Proxy {
                    global: object,
                    info: false,
                    owned: false,
                },
            );
            Some(proxy)
        })
    }

    fn subscribe_object_info(&mut self, proxy: ProxyId) {
        self.with_connection(|state, id| {
            let global = state.connections.get(&id)?.proxies.get(&proxy)?.global;
            let props = match state.globals.get(&global) {
                Some(g) if g.kind == ObjectType::Port => g.props.clone(),
                _ => return None,
            };
            let conn = state.connections.get_mut(&id)?;
            conn.proxies.get_mut(&proxy)?.info = true;
            // Current info is sent as soon as a listener is attached.
            conn.send(TransportEvent::PortInfo { id: global, props });
            Some(())
        });
    }

    fn destroy_proxy(&mut self, proxy: ProxyId) {
        self.with_connection(|state, id| {
            let removed = state.connections.get_mut(&id)?.proxies.remove(&proxy)?;
            if removed.owned {
                state.remove_global(removed.global);
            }
            Some(())
        });
    }

    fn sync(&mut self, seq: u32) -> Result<u32, TransportError> {
        self.with_connection(|state, id| {
            state.sync_requests += 1;
            state.connections.get(&id)?.send(TransportEvent::Done { seq });
            Some(seq)
        })
        .ok_or(TransportError::Disconnected)
    }

    fn create_object(
        &mut self,
        factory: &str,
        kind: ObjectType,
        props: &Properties,
    ) -> Option<ProxyId> {
        if factory != LINK_FACTORY || kind != ObjectType::Link {
            return None;
        }
        self.with_connection(|state, id| state.create_link(id, props))
    }

    fn create_local_node(&mut self, props: &Properties) -> Option<NodeToken> {
        self.with_connection(|state, id| {
            let conn = state.connections.get_mut(&id)?;
            let token = NodeToken(conn.next_handle());
            conn.nodes.insert(
                token,
                LocalNodeState {
                    props: props.clone(),
                    ports: Vec::new(),
                    active: false,
                    node_id: None,
                },
            );
            Some(token)
        })
    }

    fn add_local_port(
        &mut self,
        node: NodeToken,
        direction: Direction,
        props: &Properties,
    ) -> Option<PortToken> {
        self.with_connection(|state, id| {
            let conn = state.connections.get_mut(&id)?;
            let token = PortToken(conn.next_handle());
            conn.nodes.get_mut(&node)?.ports.push(LocalPortState {
                token,
                direction,
                props: props.clone(),
                global: None,
            });
            state.publish_local_ports(id, node);
            Some(token)
        })
    }

    fn update_local_port(&mut self, node: NodeToken, port: PortToken, props: &Properties) {
        self.with_connection(|state, id| {
            let local = state
                .connections
                .get_mut(&id)?
                .nodes
                .get_mut(&node)?
                .ports
                .iter_mut()
                .find(|p| p.token == port)?;
            local.props.extend(props);
            let global = local.global?;
            state.globals.get_mut(&global)?.props.extend(props);
            state.send_port_info(global);
            Some(())
        });
    }

    fn remove_local_port(&mut self, node: NodeToken, port: PortToken) {
        self.with_connection(|state, id| {
            let ports = &mut state.connections.get_mut(&id)?.nodes.get_mut(&node)?.ports;
            let pos = ports.iter().position(|p| p.token == port)?;
            let removed = ports.remove(pos);
            if let Some(global) = removed.global {
                state.remove_global(global);
            }
            Some(())
        });
    }

    fn activate_local_node(&mut self, node: NodeToken) -> Result<(), TransportError> {
        let mut state = self.server.state.lock();
        let conn = state
            .connections
            .get_mut(&self.id)
            .ok_or(TransportError::Disconnected)?;
        let local = conn
            .nodes
            .get_mut(&node)
            .ok_or_else(|| TransportError::Rejected("unknown node".to_string()))?;
        local.active = true;
        state.assign_node(self.id, node);
        Ok(())
    }

    fn destroy_local_node(&mut self, node: NodeToken) {
        self.with_connection(|state, id| {
            state.destroy_node(id, node);
            Some(())
        });
    }

    fn assigned_node_id(&self, node: NodeToken) -> u32 {
        self.with_connection(|state, id| state.connections.get(&id)?.nodes.get(&node)?.node_id)
            .unwrap_or(UNASSIGNED_NODE_ID)
    }

    fn drive_once(
        &mut self,
        timeout: Duration,
        events: &mut Vec<TransportEvent>,
    ) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(event) => events.push(event),
            Err(RecvTimeoutError::Timeout) => return Ok(()),
            Err(RecvTimeoutError::Disconnected) => return Err(TransportError::Disconnected),
        }
        events.extend(self.rx.try_iter());
        Ok(())
    }

    fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        self.server.state.lock().drop_connection(self.id);
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchbay_graph::properties;

    fn connect(server: &MemoryServer) -> Box<dyn Transport> {
        server
            .backend()
            .connect(&ClientConfig::default())
            .expect("connect")
    }

    fn drain(transport: &mut dyn Transport) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        transport
            .drive_once(Duration::from_millis(1), &mut events)
            .expect("drive");
        events
    }

    fn port(direction: &str) -> Properties {
        properties! {
            keys::FORMAT_DSP => "32 bit float mono audio",
            keys::NODE_ID => "7",
            keys::PORT_DIRECTION => direction,
        }
    }

    #[test]
    fn test_subscribe_replays_existing_objects() {
        let server = MemoryServer::new();
        let id = server.add_port(port("out"));
        let mut transport = connect(&server);
        transport.subscribe_globals().unwrap();
        assert_eq!(
            drain(transport.as_mut()),
            vec![TransportEvent::Global {
                id,
                kind: ObjectType::Port
            }]
        );
    }

    #[test]
    fn test_done_is_queued_behind_pending_events() {
        let server = MemoryServer::new();
        let mut transport = connect(&server);
        transport.subscribe_globals().unwrap();
        let id = server.add_port(port("in"));
        transport.sync(9).unwrap();
        let events = drain(transport.as_mut());
        assert_eq!(
            events,
            vec![
                TransportEvent::Global {
                    id,
                    kind: ObjectType::Port
                },
                TransportEvent::Done { seq: 9 },
            ]
        );
        assert_eq!(server.sync_requests(), 1);
    }

    #[test]
    fn test_info_sent_on_subscribe_and_update() {
        let server = MemoryServer::new();
        let id = server.add_port(port("in"));
        let mut transport = connect(&server);
        let proxy = transport.bind_object(id, ObjectType::Port).unwrap();
        transport.subscribe_object_info(proxy);
        assert!(matches!(
            drain(transport.as_mut()).as_slice(),
            [TransportEvent::PortInfo { id: got, .. }] if *got == id
        ));

        assert!(server.update_port(id, port("out")));
        let events = drain(transport.as_mut());
        assert_eq!(
            events,
            vec![TransportEvent::PortInfo {
                id,
                props: port("out")
            }]
        );
    }

    #[test]
    fn test_bind_wrong_kind_fails() {
        let server = MemoryServer::new();
        let id = server.add_object(ObjectType::Device, Properties::new());
        let mut transport = connect(&server);
        assert!(transport.bind_object(id, ObjectType::Port).is_none());
        assert!(transport.bind_object(999, ObjectType::Port).is_none());
    }

    #[test]
    fn test_link_requires_output_then_input() {
        let server = MemoryServer::new();
        let out = server.add_port(port("out"));
        let inp = server.add_port(port("in"));
        let mut transport = connect(&server);

        let link = |o: u32, i: u32| {
            properties! {
                keys::LINK_OUTPUT_PORT => o.to_string(),
                keys::LINK_INPUT_PORT => i.to_string(),
            }
        };
        assert!(transport
            .create_object(LINK_FACTORY, ObjectType::Link, &link(inp, out))
            .is_none());
        assert!(transport
            .create_object("other-factory", ObjectType::Link, &link(out, inp))
            .is_none());
        let proxy = transport
            .create_object(LINK_FACTORY, ObjectType::Link, &link(out, inp))
            .unwrap();
        assert_eq!(server.links(), vec![(out, inp)]);

        transport.destroy_proxy(proxy);
        assert!(server.links().is_empty());
    }

    #[test]
    fn test_duplicate_link_policy() {
        let server = MemoryServer::new();
        let out = server.add_port(port("out"));
        let inp = server.add_port(port("in"));
        let mut transport = connect(&server);
        let props = properties! {
            keys::LINK_OUTPUT_PORT => out.to_string(),
            keys::LINK_INPUT_PORT => inp.to_string(),
        };

        server.set_allow_duplicate_links(false);
        assert!(transport
            .create_object(LINK_FACTORY, ObjectType::Link, &props)
            .is_some());
        assert!(transport
            .create_object(LINK_FACTORY, ObjectType::Link, &props)
            .is_none());
        assert_eq!(server.links().len(), 1);
    }

    #[test]
    fn test_activate_publishes_ports_with_node_id() {
        let server = MemoryServer::new();
        let mut transport = connect(&server);
        let node = transport.create_local_node(&Properties::new()).unwrap();
        transport
            .add_local_port(node, Direction::Output, &properties! { keys::PORT_NAME => "out" })
            .unwrap();
        assert_eq!(transport.assigned_node_id(node), UNASSIGNED_NODE_ID);
        assert!(server.port_ids().is_empty());

        transport.activate_local_node(node).unwrap();
        let node_id = transport.assigned_node_id(node);
        assert_ne!(node_id, UNASSIGNED_NODE_ID);
        assert_eq!(server.object_kind(node_id), Some(ObjectType::Node));

        let ports = server.port_ids();
        assert_eq!(ports.len(), 1);
        let props = server.object_properties(ports[0]).unwrap();
        assert_eq!(props.get(keys::NODE_ID), Some(node_id.to_string().as_str()));
        assert_eq!(props.get(keys::PORT_DIRECTION), Some("out"));

        transport.destroy_local_node(node);
        assert!(server.port_ids().is_empty());
        assert_eq!(server.object_kind(node_id), None);
    }

    #[test]
    fn test_deferred_node_assignment() {
        let server = MemoryServer::new();
        server.set_assign_node_ids(false);
        let mut transport = connect(&server);
        let node = transport.create_local_node(&Properties::new()).unwrap();
        transport.activate_local_node(node).unwrap();
        assert_eq!(transport.assigned_node_id(node), UNASSIGNED_NODE_ID);

        server.set_assign_node_ids(true);
        server.assign_pending_nodes();
        assert_ne!(transport.assigned_node_id(node), UNASSIGNED_NODE_ID);
    }

    #[test]
    fn test_disconnect_cleans_up_owned_objects() {
        let server = MemoryServer::new();
        let out = server.add_port(port("out"));
        let inp = server.add_port(port("in"));
        let mut transport = connect(&server);
        let props = properties! {
            keys::LINK_OUTPUT_PORT => out.to_string(),
            keys::LINK_INPUT_PORT => inp.to_string(),
        };
        let _ = transport.create_object(LINK_FACTORY, ObjectType::Link, &props);
        assert_eq!(server.connection_count(), 1);

        drop(transport);
        assert_eq!(server.connection_count(), 0);
        assert!(server.links().is_empty());
        assert_eq!(server.port_ids(), vec![out, inp]);
    }

    #[test]
    fn test_server_disconnect_surfaces_on_drive() {
        let server = MemoryServer::new();
        let mut transport = connect(&server);
        server.disconnect_all();
        let mut events = Vec::new();
        assert_eq!(
            transport.drive_once(Duration::from_millis(1), &mut events),
            Err(TransportError::Disconnected)
        );
        assert_eq!(transport.sync(1), Err(TransportError::Disconnected));
    }

    #[test]
    fn test_reserved_id_is_rejected() {
        let server = MemoryServer::new();
        assert!(!server.add_port_with_id(UNASSIGNED_NODE_ID, Properties::new()));
        assert_eq!(server.object_kind(UNASSIGNED_NODE_ID), None);
    }

    #[test]
    fn test_ids_near_the_top_wrap_without_reserved_id() {
        let server = MemoryServer::new();
        assert!(server.add_port_with_id(UNASSIGNED_NODE_ID - 1, port("out")));

        let next = server.add_port(port("in"));
        assert_ne!(next, UNASSIGNED_NODE_ID);
        assert_eq!(next, FIRST_OBJECT_ID);

        // A node assigned after the wrap still reads as assigned
        let mut transport = connect(&server);
        let node = transport.create_local_node(&Properties::new()).unwrap();
        transport.activate_local_node(node).unwrap();
        let node_id = transport.assigned_node_id(node);
        assert_ne!(node_id, UNASSIGNED_NODE_ID);
        assert_eq!(server.object_kind(node_id), Some(ObjectType::Node));
    }

    #[test]
    fn test_refused_connection() {
        let server = MemoryServer::new();
        server.set_refuse_connections(true);
        assert!(matches!(
            server.backend().connect(&ClientConfig::default()),
            Err(TransportError::ConnectFailed(_))
        ));
    }
}
