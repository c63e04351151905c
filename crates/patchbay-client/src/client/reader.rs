//! Read-only view of a client's graph mirror.

use parking_lot::{RwLock, RwLockReadGuard};
use patchbay_graph::{Category, Direction, Graph, MediaKind, PortInfo};
use std::sync::Arc;

/// Cloneable, thread-safe reader for the mirror.
///
/// Reads see the state as of the last loop iteration on the owning client.
/// Hold the guard from [`read`](Self::read) only briefly: the client blocks
/// on it while applying events.
#[derive(Clone)]
pub struct GraphReader {
    graph: Arc<RwLock<Graph>>,
}

impl GraphReader {
    pub(crate) fn new(graph: Arc<RwLock<Graph>>) -> Self {
        Self { graph }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Graph> {
        self.graph.read()
    }

    /// Owned copy of the whole mirror.
    pub fn snapshot(&self) -> Graph {
        self.graph.read().clone()
    }

    pub fn ports(&self, category: Category, node_id: u32, direction: Direction) -> Vec<PortInfo> {
        self.graph.read().ports(category, node_id, direction).to_vec()
    }

    pub fn list_ports(&self, kind: MediaKind, direction: Direction) -> Vec<PortInfo> {
        self.graph
            .read()
            .list_ports(kind, direction)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn for_each_port(&self, f: impl FnMut(&PortInfo)) {
        self.graph.read().for_each_port(f);
    }

    pub fn port_count(&self) -> usize {
        self.graph.read().port_count()
    }
}

impl std::fmt::Debug for GraphReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphReader")
            .field("ports", &self.port_count())
            .finish()
    }
}
