//! Relay node functionality for forwarding onion packets
//!
//! Peels exactly one layer and decides between forwarding and delivery.
//! The handler keeps no per-circuit state; the only shared data is the
//! read-only private key and a few counters.

use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::crypto::envelope::{peel_layer, EnvelopeError};
use crate::NodeId;

/// Errors from processing a single envelope
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("Envelope rejected: {0}")]
    Envelope(#[from] EnvelopeError),
    #[error("Relay mode disabled")]
    RelayDisabled,
    #[error("Final delivery disabled")]
    TerminateDisabled,
}

/// What a node may do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    /// Forward envelopes for others
    pub can_relay: bool,
    /// Originate circuits
    pub can_initiate: bool,
    /// Accept final delivery
    pub can_terminate: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            can_relay: true, // All nodes are relays by default
            can_initiate: true,
            can_terminate: true,
        }
    }
}

impl Capabilities {
    /// Forwarding only
    pub fn relay_only() -> Self {
        Self {
            can_relay: true,
            can_initiate: false,
            can_terminate: false,
        }
    }
}

/// Outcome of peeling one layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    /// Send the still-encrypted inner envelope to `next_hop`
    Forward { next_hop: NodeId, packet_bytes: Vec<u8> },
    /// This node is the final hop
    Deliver { payload: Vec<u8> },
}

/// Statistics about relay operations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub packets_relayed: u64,
    pub packets_delivered: u64,
    pub packets_rejected: u64,
}

/// Handles the peel-and-classify step for this node
#[derive(Debug)]
pub struct RelayHandler {
    node_id: NodeId,
    private_key: Arc<RsaPrivateKey>,
    capabilities: Capabilities,
    packets_relayed: AtomicU64,
    packets_delivered: AtomicU64,
    packets_rejected: AtomicU64,
}

impl RelayHandler {
    pub fn new(node_id: NodeId, private_key: Arc<RsaPrivateKey>, capabilities: Capabilities) -> Self {
        info!(
            "Relay {}: relay={} terminate={}",
            node_id, capabilities.can_relay, capabilities.can_terminate
        );
        Self {
            node_id,
            private_key,
            capabilities,
            packets_relayed: AtomicU64::new(0),
            packets_delivered: AtomicU64::new(0),
            packets_rejected: AtomicU64::new(0),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Peel one layer and classify it
    ///
    /// The next hop being our own id or the terminal sentinel means the
    /// payload is plaintext for us; anything else is forwarded untouched.
    pub fn handle_packet(&self, packet_bytes: &[u8]) -> Result<RelayAction, RelayError> {
        let layer = match peel_layer(&self.private_key, packet_bytes) {
            Ok(layer) => layer,
            Err(e) => {
                self.packets_rejected.fetch_add(1, Ordering::Relaxed);
                debug!("Relay {}: peel failed: {}", self.node_id, e);
                return Err(e.into());
            }
        };

        if layer.next_hop == self.node_id || layer.next_hop.is_terminal() {
            if !self.capabilities.can_terminate {
                self.packets_rejected.fetch_add(1, Ordering::Relaxed);
                return Err(RelayError::TerminateDisabled);
            }
            self.packets_delivered.fetch_add(1, Ordering::Relaxed);
            debug!("Relay {}: final hop, {} byte payload", self.node_id, layer.payload.len());
            return Ok(RelayAction::Deliver { payload: layer.payload });
        }

        if !self.capabilities.can_relay {
            self.packets_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(RelayError::RelayDisabled);
        }
        self.packets_relayed.fetch_add(1, Ordering::Relaxed);
        debug!("Relay {}: forward to {}", self.node_id, layer.next_hop);
        Ok(RelayAction::Forward {
            next_hop: layer.next_hop,
            packet_bytes: layer.payload,
        })
    }

    /// Get relay statistics
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            packets_relayed: self.packets_relayed.load(Ordering::Relaxed),
            packets_delivered: self.packets_delivered.load(Ordering::Relaxed),
            packets_rejected: self.packets_rejected.load(Ordering::Relaxed),
        }
    }
}
