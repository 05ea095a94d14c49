//! Privacy Manager - node-level onion routing
//!
//! Ties circuit construction, the relay handler, the directory and the
//! transport together: originate messages, and peel-then-forward or
//! peel-then-deliver incoming envelopes.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::network::directory::{Directory, DirectoryError};
use crate::network::transport::{send_with_timeout, Transport, TransportError};
use crate::privacy::circuit::{Circuit, CircuitBuilder, CircuitError, HopSelector, OnionOutgoing};
use crate::privacy::delivery::DeliveryObserver;
use crate::privacy::relay::{Capabilities, RelayAction, RelayError, RelayHandler, RelayStats};
use crate::NodeId;

/// Configuration for the privacy layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    /// Random relays placed before the destination
    pub relay_count: usize,
    /// Deadline for a single hop send
    pub send_timeout_ms: u64,
    /// What this node may do
    pub capabilities: Capabilities,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            relay_count: 2, // Sender -> R1 -> R2 -> Receiver
            send_timeout_ms: 5_000,
            capabilities: Capabilities::default(),
        }
    }
}

impl PrivacyConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn with_relay_count(mut self, relay_count: usize) -> Self {
        self.relay_count = relay_count;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// Errors surfaced by the privacy manager
#[derive(Debug, Error)]
pub enum PrivacyError {
    #[error("This node may not originate circuits")]
    InitiateDisabled,
    #[error("Circuit error: {0}")]
    Circuit(#[from] CircuitError),
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Envelope worker failed: {0}")]
    Worker(String),
}

/// What happened to an incoming envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Inner envelope sent on to the next hop
    Forwarded { next_hop: NodeId },
    /// Plaintext handed to the delivery observer
    Delivered { len: usize },
}

/// Manages onion routing for one node
pub struct PrivacyManager {
    node_id: NodeId,
    config: PrivacyConfig,
    relay_handler: Arc<RelayHandler>,
    circuit_builder: CircuitBuilder,
    directory: Arc<dyn Directory>,
    transport: Arc<dyn Transport>,
    observer: Arc<dyn DeliveryObserver>,
}

impl PrivacyManager {
    /// Create a new privacy manager
    pub fn new(
        node_id: NodeId,
        private_key: Arc<RsaPrivateKey>,
        config: PrivacyConfig,
        directory: Arc<dyn Directory>,
        transport: Arc<dyn Transport>,
        observer: Arc<dyn DeliveryObserver>,
    ) -> Self {
        let relay_handler = Arc::new(RelayHandler::new(node_id, private_key, config.capabilities));
        let circuit_builder = CircuitBuilder::with_random_hops(config.relay_count);
        Self {
            node_id,
            config,
            relay_handler,
            circuit_builder,
            directory,
            transport,
            observer,
        }
    }

    /// Replace the hop selection strategy
    pub fn with_selector(mut self, selector: Box<dyn HopSelector>) -> Self {
        self.circuit_builder = CircuitBuilder::new(selector);
        self
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn config(&self) -> &PrivacyConfig {
        &self.config
    }

    /// Get relay statistics
    pub fn relay_stats(&self) -> RelayStats {
        self.relay_handler.stats()
    }

    /// Send `payload` to `destination` over a freshly chosen circuit
    ///
    /// Nothing touches the network unless the whole onion was built.
    pub async fn send_message(
        &self,
        destination: NodeId,
        payload: &[u8],
    ) -> Result<Circuit, PrivacyError> {
        self.ensure_can_initiate()?;
        let snapshot = self.directory.snapshot();
        let circuit = self
            .circuit_builder
            .plan_circuit(&snapshot, self.node_id, destination)?;
        let onion = circuit.wrap_message(&snapshot, payload)?;
        self.dispatch(onion).await?;
        Ok(circuit)
    }

    /// Send `payload` along an explicit path
    pub async fn send_via(&self, hops: &[NodeId], payload: &[u8]) -> Result<Circuit, PrivacyError> {
        self.ensure_can_initiate()?;
        let snapshot = self.directory.snapshot();
        let circuit = self.circuit_builder.build_with_hops(hops.to_vec());
        let onion = circuit.wrap_message(&snapshot, payload)?;
        self.dispatch(onion).await?;
        Ok(circuit)
    }

    /// Process an incoming envelope
    ///
    /// The RSA unwrap runs on the blocking pool so large keys do not stall
    /// the runtime. Failures drop this envelope only; they are logged and
    /// returned, never retried, and the sender is not told.
    pub async fn process_incoming(&self, packet_bytes: &[u8]) -> Result<RelayOutcome, PrivacyError> {
        let handler = self.relay_handler.clone();
        let packet = packet_bytes.to_vec();
        let peeled = tokio::task::spawn_blocking(move || handler.handle_packet(&packet))
            .await
            .map_err(|e| {
                warn!("PrivacyManager {}: envelope worker failed: {}", self.node_id, e);
                PrivacyError::Worker(e.to_string())
            })?;
        let action = match peeled {
            Ok(action) => action,
            Err(e) => {
                warn!("PrivacyManager {}: dropping envelope: {}", self.node_id, e);
                return Err(e.into());
            }
        };

        match action {
            RelayAction::Deliver { payload } => {
                info!("PrivacyManager {}: delivered {} byte payload", self.node_id, payload.len());
                let observer = &self.observer;
                if catch_unwind(AssertUnwindSafe(|| observer.on_delivered(&payload))).is_err() {
                    warn!("PrivacyManager {}: delivery observer panicked", self.node_id);
                }
                Ok(RelayOutcome::Delivered { len: payload.len() })
            }
            RelayAction::Forward { next_hop, packet_bytes } => {
                let entry = self.directory.get(next_hop).map_err(|e| {
                    warn!("PrivacyManager {}: cannot resolve {}: {}", self.node_id, next_hop, e);
                    e
                })?;
                debug!("PrivacyManager {}: forwarding to {} at {}", self.node_id, next_hop, entry.address);
                send_with_timeout(
                    self.transport.as_ref(),
                    &entry.address,
                    packet_bytes,
                    self.config.send_timeout(),
                )
                .await
                .map_err(|e| {
                    warn!("PrivacyManager {}: forward to {} failed: {}", self.node_id, next_hop, e);
                    e
                })?;
                Ok(RelayOutcome::Forwarded { next_hop })
            }
        }
    }

    async fn dispatch(&self, onion: OnionOutgoing) -> Result<(), PrivacyError> {
        debug!(
            "PrivacyManager {}: sending {} bytes to entry {}",
            self.node_id,
            onion.packet_bytes.len(),
            onion.entry_node
        );
        send_with_timeout(
            self.transport.as_ref(),
            &onion.entry_address,
            onion.packet_bytes,
            self.config.send_timeout(),
        )
        .await?;
        Ok(())
    }

    fn ensure_can_initiate(&self) -> Result<(), PrivacyError> {
        if self.config.capabilities.can_initiate {
            Ok(())
        } else {
            Err(PrivacyError::InitiateDisabled)
        }
    }
}

impl std::fmt::Debug for PrivacyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivacyManager")
            .field("node_id", &self.node_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
