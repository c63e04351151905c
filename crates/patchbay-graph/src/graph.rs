//! Classified mirror of the server's port graph.
//!
//! Ports are bucketed by [`Category`] and then by owning node id. The mirror
//! only ever holds ports that could be classified; ports without a node id
//! or with an unrecognized format are dropped on insertion.

use crate::error::Result;
use crate::port::{Category, Direction, MediaKind, PortInfo};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Ports of a single node, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Node {
    pub inputs: Vec<PortInfo>,
    pub outputs: Vec<PortInfo>,
}

impl Node {
    pub fn ports(&self, direction: Direction) -> &[PortInfo] {
        match direction {
            Direction::Input => &self.inputs,
            Direction::Output => &self.outputs,
        }
    }

    fn ports_mut(&mut self, direction: Direction) -> &mut Vec<PortInfo> {
        match direction {
            Direction::Input => &mut self.inputs,
            Direction::Output => &mut self.outputs,
        }
    }

    pub fn len(&self) -> usize {
        self.inputs.len() + self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }

    fn remove(&mut self, id: u32) -> Option<PortInfo> {
        for ports in [&mut self.inputs, &mut self.outputs] {
            if let Some(pos) = ports.iter().position(|p| p.id == id) {
                return Some(ports.remove(pos));
            }
        }
        None
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Graph {
    categories: [HashMap<u32, Node>; 4],
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `port` and append it to its node.
    ///
    /// Returns where the port landed, or `None` if it was dropped. A port id
    /// that is already present is replaced, so each id lives in at most one
    /// bucket. Fails only when the node id is not an integer, in which case
    /// the mirror is left untouched.
    pub fn insert_port(&mut self, port: PortInfo) -> Result<Option<(Category, u32)>> {
        let node_id = port.parsed_node_id()?;

        if self.remove_port(port.id).is_some() {
            trace!(port = port.id, "replacing port record");
        }

        let Some(node_id) = node_id else {
            debug!(port = port.id, "dropping port without node id");
            return Ok(None);
        };
        let Some(category) = port.category() else {
            debug!(port = port.id, format = %port.format, "dropping unclassified port");
            return Ok(None);
        };

        trace!(port = port.id, node = node_id, ?category, direction = ?port.direction, "port added");
        let direction = port.direction;
        self.categories[category.index()]
            .entry(node_id)
            .or_default()
            .ports_mut(direction)
            .push(port);
        Ok(Some((category, node_id)))
    }

    /// Remove the port with `id` from whichever bucket holds it.
    ///
    /// The owning node is kept even when it becomes empty.
    pub fn remove_port(&mut self, id: u32) -> Option<PortInfo> {
        self.categories
            .iter_mut()
            .flat_map(|nodes| nodes.values_mut())
            .find_map(|node| node.remove(id))
    }

    pub fn nodes(&self, category: Category) -> &HashMap<u32, Node> {
        &self.categories[category.index()]
    }

    pub fn node(&self, category: Category, node_id: u32) -> Option<&Node> {
        self.categories[category.index()].get(&node_id)
    }

    /// Ports of node `node_id` in `category`; empty if the node is unknown.
    pub fn ports(&self, category: Category, node_id: u32, direction: Direction) -> &[PortInfo] {
        self.node(category, node_id)
            .map(|node| node.ports(direction))
            .unwrap_or(&[])
    }

    pub fn find_port(&self, id: u32) -> Option<(Category, &PortInfo)> {
        Category::ALL.into_iter().find_map(|category| {
            self.nodes(category)
                .values()
                .flat_map(|node| node.inputs.iter().chain(node.outputs.iter()))
                .find(|p| p.id == id)
                .map(|p| (category, p))
        })
    }

    /// First port whose name, alias or object path equals `name`.
    pub fn find_port_by_name(&self, name: &str) -> Option<&PortInfo> {
        self.iter_ports().find(|p| p.matches_name(name))
    }

    pub fn iter_ports(&self) -> impl Iterator<Item = &PortInfo> {
        self.categories
            .iter()
            .flat_map(|nodes| nodes.values())
            .flat_map(|node| node.inputs.iter().chain(node.outputs.iter()))
    }

    /// Visit every classified port, inputs before outputs per node.
    pub fn for_each_port(&self, mut f: impl FnMut(&PortInfo)) {
        for port in self.iter_ports() {
            f(port);
        }
    }

    pub fn port_count(&self) -> usize {
        self.categories
            .iter()
            .flat_map(|nodes| nodes.values())
            .map(Node::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.port_count() == 0
    }

    /// `(inputs, outputs)` of `node_id` summed over every category.
    pub fn node_port_counts(&self, node_id: u32) -> (usize, usize) {
        self.categories
            .iter()
            .filter_map(|nodes| nodes.get(&node_id))
            .fold((0, 0), |(ins, outs), node| {
                (ins + node.inputs.len(), outs + node.outputs.len())
            })
    }

    /// All ports of one media kind and direction, physical and software,
    /// ordered by node then port id.
    pub fn list_ports(&self, kind: MediaKind, direction: Direction) -> Vec<&PortInfo> {
        let mut ports: Vec<(u32, &PortInfo)> = Category::ALL
            .into_iter()
            .filter(|category| category.kind() == kind)
            .flat_map(|category| self.nodes(category).iter())
            .flat_map(|(node_id, node)| node.ports(direction).iter().map(move |p| (*node_id, p)))
            .collect();
        ports.sort_by_key(|(node_id, p)| (*node_id, p.id));
        ports.into_iter().map(|(_, p)| p).collect()
    }

    pub fn clear(&mut self) {
        for nodes in &mut self.categories {
            nodes.clear();
        }
    }
}
