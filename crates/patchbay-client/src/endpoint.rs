//! Publishing this process's own node and ports into the graph.
//!
//! Creating a node is fire-and-forget: the server assigns the node id and
//! announces the node's ports some loop iterations later. [`GraphClient::publish`]
//! bridges that gap with two bounded polling loops, one barrier per
//! iteration, so a server that never catches up cannot hang the caller.

use crate::client::GraphClient;
use crate::error::{Error, Result};
use crate::transport::{NodeToken, PortToken, UNASSIGNED_NODE_ID};
use patchbay_graph::{keys, properties, Direction, Properties};
use tracing::{debug, warn};

/// Format tag of local MIDI ports.
pub const MIDI_FORMAT: &str = "8 bit raw midi";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPort {
    pub token: PortToken,
    pub name: String,
    pub direction: Direction,
}

/// A node owned by this client.
#[derive(Debug)]
pub struct LocalEndpoint {
    token: NodeToken,
    name: String,
    ports: Vec<LocalPort>,
    active: bool,
}

impl LocalEndpoint {
    pub fn token(&self) -> NodeToken {
        self.token
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ports(&self) -> &[LocalPort] {
        &self.ports
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// `(inputs, outputs)` the mirror should eventually show for this node.
    pub fn expected_counts(&self) -> (usize, usize) {
        let inputs = self
            .ports
            .iter()
            .filter(|p| p.direction == Direction::Input)
            .count();
        (inputs, self.ports.len() - inputs)
    }
}

/// Outcome of waiting for an endpoint. Never an error: `ready == false`
/// means the retry budget ran out and the caller should re-check later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Publication {
    pub node_id: Option<u32>,
    pub ready: bool,
    pub sync_attempts: usize,
}

#[derive(Debug)]
pub struct PublishedEndpoint {
    pub endpoint: LocalEndpoint,
    pub publication: Publication,
}

impl GraphClient {
    fn validate_name(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidName("name is empty".to_string()));
        }
        if name.contains('\0') {
            return Err(Error::InvalidName(format!("{name:?} contains NUL")));
        }
        let max = self.config.max_name_len;
        if name.len() > max {
            return Err(Error::PortNameTooLong {
                len: name.len(),
                max,
            });
        }
        Ok(())
    }

    /// Ports are addressed as `node:port`, so the limit applies to the
    /// full name.
    fn validate_port_name(&self, node_name: &str, port_name: &str) -> Result<()> {
        self.validate_name(port_name)?;
        let len = node_name.len() + 1 + port_name.len();
        let max = self.config.max_name_len;
        if len > max {
            return Err(Error::PortNameTooLong { len, max });
        }
        Ok(())
    }

    fn node_properties(&self, name: &str) -> Properties {
        let mut props = properties! {
            keys::NODE_NAME => name,
            keys::MEDIA_TYPE => "Midi",
            keys::MEDIA_CATEGORY => "Filter",
            keys::MEDIA_ROLE => "DSP",
            keys::MEDIA_NAME => self.config.client_name.as_str(),
            keys::NODE_LOCK_RATE => "true",
            keys::NODE_ALWAYS_PROCESS => "true",
            keys::NODE_PAUSE_ON_IDLE => "false",
            keys::NODE_SUSPEND_ON_IDLE => "false",
        };
        props.extend(&self.config.node_properties);
        props
    }

    /// Create an inactive local node. Nothing is visible in the graph until
    /// [`activate_endpoint`](Self::activate_endpoint).
    pub fn create_endpoint(&mut self, name: &str) -> Result<LocalEndpoint> {
        self.check()?;
        self.validate_name(name)?;
        let props = self.node_properties(name);
        let token = self
            .transport_mut()?
            .create_local_node(&props)
            .ok_or_else(|| Error::NodeAllocationFailed(name.to_string()))?;
        self.local_nodes.push(token);
        debug!(node = name, "local node created");
        Ok(LocalEndpoint {
            token,
            name: name.to_string(),
            ports: Vec::new(),
            active: false,
        })
    }

    pub fn add_local_port(
        &mut self,
        endpoint: &mut LocalEndpoint,
        name: &str,
        direction: Direction,
    ) -> Result<PortToken> {
        self.check()?;
        self.validate_port_name(&endpoint.name, name)?;
        let props = properties! {
            keys::FORMAT_DSP => MIDI_FORMAT,
            keys::PORT_NAME => name,
        };
        let token = self
            .transport_mut()?
            .add_local_port(endpoint.token, direction, &props)
            .ok_or_else(|| Error::PortAllocationFailed(name.to_string()))?;
        endpoint.ports.push(LocalPort {
            token,
            name: name.to_string(),
            direction,
        });
        debug!(node = %endpoint.name, port = name, ?direction, "local port added");
        Ok(token)
    }

    pub fn rename_local_port(
        &mut self,
        endpoint: &mut LocalEndpoint,
        token: PortToken,
        name: &str,
    ) -> Result<()> {
        self.check()?;
        self.validate_port_name(&endpoint.name, name)?;
        let port = endpoint
            .ports
            .iter_mut()
            .find(|p| p.token == token)
            .ok_or(Error::UnknownLocalPort)?;
        let props = properties! { keys::PORT_NAME => name };
        self.transport_mut()?
            .update_local_port(endpoint.token, token, &props);
        port.name = name.to_string();
        Ok(())
    }

    pub fn remove_local_port(&mut self, endpoint: &mut LocalEndpoint, token: PortToken) -> Result<()> {
        self.check()?;
        let pos = endpoint
            .ports
            .iter()
            .position(|p| p.token == token)
            .ok_or(Error::UnknownLocalPort)?;
        self.transport_mut()?.remove_local_port(endpoint.token, token);
        let port = endpoint.ports.remove(pos);
        debug!(node = %endpoint.name, port = %port.name, "local port removed");
        Ok(())
    }

    /// Connect the node to the graph so the server assigns it an id.
    pub fn activate_endpoint(&mut self, endpoint: &mut LocalEndpoint) -> Result<()> {
        self.check()?;
        if endpoint.active {
            return Ok(());
        }
        self.transport_mut()?.activate_local_node(endpoint.token)?;
        endpoint.active = true;
        Ok(())
    }

    /// Node id the server assigned, if any yet.
    pub fn endpoint_node_id(&self, endpoint: &LocalEndpoint) -> Option<u32> {
        self.transport_ref()
            .map(|t| t.assigned_node_id(endpoint.token))
            .filter(|&id| id != UNASSIGNED_NODE_ID)
    }

    /// Whether the mirror shows at least the endpoint's ports for its node.
    pub fn endpoint_ready(&self, endpoint: &LocalEndpoint) -> bool {
        let Some(node_id) = self.endpoint_node_id(endpoint) else {
            return false;
        };
        let (want_in, want_out) = endpoint.expected_counts();
        let (have_in, have_out) = self.graph.read().node_port_counts(node_id);
        have_in >= want_in && have_out >= want_out
    }

    /// Poll until the server has assigned a node id and the mirror shows the
    /// endpoint's ports, with at most `sync_retry_limit` barrier calls per
    /// stage.
    pub fn wait_for_endpoint(&mut self, endpoint: &LocalEndpoint) -> Result<Publication> {
        self.check()?;
        let limit = self.config.sync_retry_limit;
        let mut sync_attempts = 0;

        let mut tries = 0;
        while self.endpoint_node_id(endpoint).is_none() && tries < limit {
            self.synchronize()?;
            tries += 1;
        }
        sync_attempts += tries;

        let Some(node_id) = self.endpoint_node_id(endpoint) else {
            warn!(node = %endpoint.name, attempts = sync_attempts, "server never assigned a node id");
            return Ok(Publication {
                node_id: None,
                ready: false,
                sync_attempts,
            });
        };

        let mut tries = 0;
        while !self.endpoint_ready(endpoint) && tries < limit {
            self.synchronize()?;
            tries += 1;
        }
        sync_attempts += tries;

        let ready = self.endpoint_ready(endpoint);
        if ready {
            debug!(node = %endpoint.name, node_id, attempts = sync_attempts, "endpoint published");
        } else {
            warn!(node = %endpoint.name, node_id, attempts = sync_attempts, "endpoint ports not visible yet");
        }
        Ok(Publication {
            node_id: Some(node_id),
            ready,
            sync_attempts,
        })
    }

    /// Create a node named `name` with `expected_inputs` MIDI inputs and
    /// `expected_outputs` MIDI outputs, activate it, and wait (bounded)
    /// until the mirror reflects it.
    ///
    /// Validation errors are returned before any request is sent. Running out
    /// of retries is not an error; check `publication.ready`.
    pub fn publish(
        &mut self,
        name: &str,
        expected_inputs: usize,
        expected_outputs: usize,
    ) -> Result<PublishedEndpoint> {
        self.check()?;
        self.validate_name(name)?;
        let port_names: Vec<(String, Direction)> = (0..expected_inputs)
            .map(|i| (format!("midi_in_{}", i + 1), Direction::Input))
            .chain((0..expected_outputs).map(|i| (format!("midi_out_{}", i + 1), Direction::Output)))
            .collect();
        for (port_name, _) in &port_names {
            self.validate_port_name(name, port_name)?;
        }

        let mut endpoint = self.create_endpoint(name)?;
        if let Err(e) = self.setup_endpoint(&mut endpoint, &port_names) {
            self.close_endpoint(endpoint);
            return Err(e);
        }

        let publication = match self.wait_for_endpoint(&endpoint) {
            Ok(publication) => publication,
            Err(e) => {
                self.close_endpoint(endpoint);
                return Err(e);
            }
        };
        Ok(PublishedEndpoint {
            endpoint,
            publication,
        })
    }

    fn setup_endpoint(
        &mut self,
        endpoint: &mut LocalEndpoint,
        ports: &[(String, Direction)],
    ) -> Result<()> {
        for (port_name, direction) in ports {
            self.add_local_port(endpoint, port_name, *direction)?;
        }
        self.activate_endpoint(endpoint)
    }

    /// Remove the node and its ports from the graph. Does not wait.
    pub fn close_endpoint(&mut self, endpoint: LocalEndpoint) {
        self.local_nodes.retain(|&t| t != endpoint.token);
        if let Ok(transport) = self.transport_mut() {
            transport.destroy_local_node(endpoint.token);
            debug!(node = %endpoint.name, "local node destroyed");
        }
    }
}
