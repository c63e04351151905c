//! Client configuration.

use patchbay_graph::Properties;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Barrier calls allowed per readiness loop when publishing an endpoint.
pub const DEFAULT_SYNC_RETRY_LIMIT: usize = 100;

/// Longest node or port name accepted before any request is sent.
pub const DEFAULT_MAX_NAME_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub client_name: String,
    pub sync_retry_limit: usize,
    /// Upper bound on a single loop iteration's wait, not on a barrier.
    pub loop_timeout_ms: u64,
    pub max_name_len: usize,
    /// Extra properties merged into every local node.
    pub node_properties: Properties,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_name: "patchbay".to_string(),
            sync_retry_limit: DEFAULT_SYNC_RETRY_LIMIT,
            loop_timeout_ms: 1,
            max_name_len: DEFAULT_MAX_NAME_LEN,
            node_properties: Properties::new(),
        }
    }
}

impl ClientConfig {
    pub fn loop_timeout(&self) -> Duration {
        Duration::from_millis(self.loop_timeout_ms)
    }
}
