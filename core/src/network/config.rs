//! Node configuration

use serde::{Deserialize, Serialize};

use crate::crypto::keys::DEFAULT_KEY_BITS;
use crate::NodeId;

/// Configuration for a single overlay node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Our identifier in the directory
    pub node_id: NodeId,

    /// Address other nodes send envelopes to
    pub address: String,

    /// RSA modulus size for the node key
    pub key_bits: usize,

    /// Envelopes that may queue before senders wait
    pub inbox_capacity: usize,

    /// Envelopes processed at once; further ones stay in the inbox
    pub max_in_flight: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::new(0),
            address: "mem://node0".to_string(),
            key_bits: DEFAULT_KEY_BITS,
            inbox_capacity: 64,
            max_in_flight: 64,
        }
    }
}

impl NodeConfig {
    /// Config for an in-process node, addressed as `mem://node<id>`
    pub fn local(node_id: u32) -> Self {
        Self {
            node_id: NodeId::new(node_id),
            address: format!("mem://node{}", node_id),
            ..Self::default()
        }
    }

    pub fn with_key_bits(mut self, bits: usize) -> Self {
        self.key_bits = bits;
        self
    }

    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    /// Parse from JSON; absent fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
