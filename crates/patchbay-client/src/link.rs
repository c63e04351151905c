//! Links between ports.

use crate::client::GraphClient;
use crate::error::{Error, Result};
use crate::transport::{ObjectType, ProxyId, LINK_FACTORY};
use patchbay_graph::{keys, properties, Direction};
use tracing::{debug, warn};

/// An edge this client created. Exclusively owned; hand it back to
/// [`GraphClient::destroy_link`] to remove it.
#[must_use = "an unused LinkHandle keeps the link alive until the client closes"]
#[derive(Debug, PartialEq, Eq)]
pub struct LinkHandle {
    proxy: ProxyId,
    output_port: u32,
    input_port: u32,
}

impl LinkHandle {
    pub fn output_port(&self) -> u32 {
        self.output_port
    }

    pub fn input_port(&self) -> u32 {
        self.input_port
    }

    pub fn proxy(&self) -> ProxyId {
        self.proxy
    }
}

impl GraphClient {
    /// Link `output_port` to `input_port` and wait until the server has
    /// processed the request.
    ///
    /// A refusal is reported without a barrier. The mirror is never touched:
    /// links are not ports.
    pub fn create_link(&mut self, output_port: u32, input_port: u32) -> Result<LinkHandle> {
        self.check()?;
        let props = properties! {
            keys::LINK_OUTPUT_PORT => output_port.to_string(),
            keys::LINK_INPUT_PORT => input_port.to_string(),
        };

        let Some(proxy) = self
            .transport_mut()?
            .create_object(LINK_FACTORY, ObjectType::Link, &props)
        else {
            warn!(output_port, input_port, "could not allocate link");
            return Err(Error::AllocationFailed {
                output_port,
                input_port,
            });
        };

        if let Err(e) = self.synchronize() {
            if let Ok(transport) = self.transport_mut() {
                transport.destroy_proxy(proxy);
            }
            return Err(e);
        }

        debug!(output_port, input_port, "link created");
        Ok(LinkHandle {
            proxy,
            output_port,
            input_port,
        })
    }

    /// Destroy a link. Does not wait for the server.
    pub fn destroy_link(&mut self, link: LinkHandle) {
        if let Ok(transport) = self.transport_mut() {
            transport.destroy_proxy(link.proxy);
            debug!(
                output_port = link.output_port,
                input_port = link.input_port,
                "link destroyed"
            );
        }
    }

    /// Resolve two port names through the mirror and link them.
    ///
    /// Names match a port's name, alias or object path.
    pub fn connect_by_name(&mut self, output: &str, input: &str) -> Result<LinkHandle> {
        self.check()?;
        let (output_port, input_port) = {
            let graph = self.graph.read();
            let out = graph
                .find_port_by_name(output)
                .ok_or_else(|| Error::PortNotFound(output.to_string()))?;
            if out.direction != Direction::Output {
                return Err(Error::WrongDirection {
                    port_id: out.id,
                    expected: Direction::Output,
                });
            }
            let inp = graph
                .find_port_by_name(input)
                .ok_or_else(|| Error::PortNotFound(input.to_string()))?;
            if inp.direction != Direction::Input {
                return Err(Error::WrongDirection {
                    port_id: inp.id,
                    expected: Direction::Input,
                });
            }
            (out.id, inp.id)
        };
        self.create_link(output_port, input_port)
    }
}
