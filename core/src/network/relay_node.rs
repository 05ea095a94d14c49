//! A running overlay node
//!
//! Binds an inbox, publishes the node's public key to the directory and
//! processes every incoming envelope in its own task.

use std::sync::Arc;

use rsa::RsaPublicKey;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::crypto::keys::NodeKeyPair;
use crate::network::config::NodeConfig;
use crate::network::directory::{Directory, DirectoryError};
use crate::network::transport::{MemoryTransport, Transport, TransportError};
use crate::privacy::circuit::Circuit;
use crate::privacy::delivery::DeliveryObserver;
use crate::privacy::manager::{PrivacyConfig, PrivacyError, PrivacyManager};
use crate::NodeId;

/// Errors from bringing a node up
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// One overlay node: its config, published key and privacy manager
///
/// Created with [`RelayNode::launch`] for in-process overlays, or with
/// [`RelayNode::new`] plus [`RelayNode::spawn`] when the caller owns the
/// inbox.
pub struct RelayNode {
    config: NodeConfig,
    public_key: RsaPublicKey,
    privacy_manager: Arc<PrivacyManager>,
}

impl RelayNode {
    pub fn new(
        config: NodeConfig,
        keys: NodeKeyPair,
        privacy_config: PrivacyConfig,
        directory: Arc<dyn Directory>,
        transport: Arc<dyn Transport>,
        observer: Arc<dyn DeliveryObserver>,
    ) -> Self {
        let (public_key, private_key) = keys.into_parts();
        let privacy_manager = PrivacyManager::new(
            config.node_id,
            Arc::new(private_key),
            privacy_config,
            directory,
            transport,
            observer,
        );
        Self {
            config,
            public_key,
            privacy_manager: Arc::new(privacy_manager),
        }
    }

    /// Bind on `transport`, register with `directory` and start processing
    pub fn launch(
        config: NodeConfig,
        keys: NodeKeyPair,
        privacy_config: PrivacyConfig,
        directory: Arc<dyn Directory>,
        transport: Arc<MemoryTransport>,
        observer: Arc<dyn DeliveryObserver>,
    ) -> Result<(Self, JoinHandle<()>), NodeError> {
        let inbox = transport.bind(&config.address, config.inbox_capacity)?;
        let node = Self::new(
            config,
            keys,
            privacy_config,
            directory.clone(),
            transport.clone(),
            observer,
        );
        if let Err(e) = node.register(directory.as_ref()) {
            transport.unbind(&node.config.address);
            return Err(e.into());
        }
        let handle = node.spawn(inbox);
        Ok((node, handle))
    }

    /// Publish our id, public key and address
    pub fn register(&self, directory: &dyn Directory) -> Result<(), DirectoryError> {
        directory.register(
            self.config.node_id,
            self.public_key.clone(),
            self.config.address.clone(),
        )
    }

    pub fn node_id(&self) -> NodeId {
        self.config.node_id
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    pub fn privacy_manager(&self) -> &Arc<PrivacyManager> {
        &self.privacy_manager
    }

    /// Send a message over a randomly chosen circuit
    pub async fn send_message(&self, destination: NodeId, payload: &[u8]) -> Result<Circuit, PrivacyError> {
        self.privacy_manager.send_message(destination, payload).await
    }

    /// Process envelopes from `inbox` in the background
    pub fn spawn(&self, inbox: mpsc::Receiver<Vec<u8>>) -> JoinHandle<()> {
        tokio::spawn(Self::run(
            self.privacy_manager.clone(),
            inbox,
            self.config.max_in_flight,
        ))
    }

    /// Drain `inbox`, one task per envelope, until it closes
    ///
    /// At most `max_in_flight` envelopes are processed at once. The next one
    /// is not taken from the inbox until a slot frees up, so a stalled next
    /// hop fills the inbox and makes senders wait. Envelopes are independent,
    /// so no ordering is kept between them.
    pub async fn run(
        privacy_manager: Arc<PrivacyManager>,
        mut inbox: mpsc::Receiver<Vec<u8>>,
        max_in_flight: usize,
    ) {
        let node_id = privacy_manager.node_id();
        let max_in_flight = max_in_flight.max(1);
        let slots = Arc::new(Semaphore::new(max_in_flight));
        info!("Node {}: processing envelopes ({} at a time)", node_id, max_in_flight);
        loop {
            let Ok(permit) = slots.clone().acquire_owned().await else {
                break;
            };
            let Some(packet) = inbox.recv().await else {
                break;
            };
            debug!("Node {}: received {} bytes", node_id, packet.len());
            let manager = privacy_manager.clone();
            tokio::spawn(async move {
                // Failures are logged by the manager and end with this envelope
                let _ = manager.process_incoming(&packet).await;
                drop(permit);
            });
        }
        info!("Node {}: inbox closed", node_id);
    }
}

impl std::fmt::Debug for RelayNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayNode")
            .field("config", &self.config)
            .field("fingerprint", &crate::public_key_fingerprint(&self.public_key))
            .finish()
    }
}
