//! GraphClient builder.

use std::sync::Arc;
use std::time::Duration;

use patchbay_graph::PortInfo;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::subscriber::GraphChange;
use crate::transport::Instance;

use super::{GraphClient, GraphObserver};

#[derive(Default)]
pub struct GraphClientBuilder {
    config: ClientConfig,
    observers: Vec<GraphObserver>,
}

impl GraphClientBuilder {
    /// Start from an existing configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.config.client_name = name.into();
        self
    }

    /// Barrier calls allowed per readiness loop in `publish`.
    pub fn sync_retry_limit(mut self, limit: usize) -> Self {
        self.config.sync_retry_limit = limit;
        self
    }

    pub fn loop_timeout(mut self, timeout: Duration) -> Self {
        self.config.loop_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn max_name_len(mut self, len: usize) -> Self {
        self.config.max_name_len = len;
        self
    }

    /// Extra property for every local node this client creates.
    pub fn node_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.node_properties.insert(key, value);
        self
    }

    /// Observe every mirror change, including the ports present at open.
    pub fn observer(mut self, observer: impl FnMut(&GraphChange) + Send + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    /// Called once when a port lands in the mirror.
    pub fn on_port_added(self, mut f: impl FnMut(&PortInfo) + Send + 'static) -> Self {
        self.observer(move |change| {
            if let GraphChange::Added(port) = change {
                f(port);
            }
        })
    }

    /// Called once when a mirrored port leaves the mirror.
    pub fn on_port_removed(self, mut f: impl FnMut(&PortInfo) + Send + 'static) -> Self {
        self.observer(move |change| {
            if let GraphChange::Removed(port) = change {
                f(port);
            }
        })
    }

    pub fn build(self, instance: Arc<Instance>) -> Result<GraphClient> {
        GraphClient::open_with_observers(instance, self.config, self.observers)
    }
}

impl std::fmt::Debug for GraphClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphClientBuilder")
            .field("config", &self.config)
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_config() {
        let builder = GraphClientBuilder::default()
            .client_name("synth")
            .sync_retry_limit(7)
            .loop_timeout(Duration::from_millis(5))
            .max_name_len(32)
            .node_property("node.latency", "128/48000");

        let config = &builder.config;
        assert_eq!(config.client_name, "synth");
        assert_eq!(config.sync_retry_limit, 7);
        assert_eq!(config.loop_timeout_ms, 5);
        assert_eq!(config.max_name_len, 32);
        assert_eq!(config.node_properties.get("node.latency"), Some("128/48000"));
    }

    #[test]
    fn test_loop_timeout_saturates() {
        let builder = GraphClientBuilder::default().loop_timeout(Duration::MAX);
        assert_eq!(builder.config.loop_timeout_ms, u64::MAX);
    }

    #[test]
    fn test_observers_are_collected() {
        let builder = GraphClientBuilder::default()
            .on_port_added(|_| {})
            .on_port_removed(|_| {})
            .observer(|_| {});
        assert_eq!(builder.observers.len(), 3);
    }
}
