//! Runtime configuration

use serde::{Deserialize, Serialize};

/// Edge runtime configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Name of this edge, carried in every address
    pub edge_name: String,
    /// Open the reflection node (`meta:mesh`) in every mesh
    pub meta_enabled: bool,
    /// Maximum envelopes buffered per supply uplink before the oldest is dropped
    pub supply_queue_limit: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            edge_name: "edge".to_string(),
            meta_enabled: true,
            supply_queue_limit: 1024,
        }
    }
}

impl RuntimeConfig {
    pub fn with_edge_name(mut self, edge_name: impl Into<String>) -> Self {
        self.edge_name = edge_name.into();
        self
    }

    pub fn with_meta(mut self, enabled: bool) -> Self {
        self.meta_enabled = enabled;
        self
    }

    pub fn with_supply_queue_limit(mut self, limit: usize) -> Self {
        self.supply_queue_limit = limit.max(1);
        self
    }
}
