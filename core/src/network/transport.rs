//! Point-to-point send primitive
//!
//! The relay engine only needs "deliver these bytes to that address".
//! `MemoryTransport` implements it with bounded tokio channels so a whole
//! overlay can run inside one process.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Errors from the transport layer
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Send timed out after {0:?}")]
    Timeout(Duration),
    #[error("No route to {0}")]
    Unreachable(String),
    #[error("Peer at {0} has shut down")]
    Closed(String),
    #[error("Address {0} is already bound")]
    AddressInUse(String),
}

/// Reliable send to an addressable node
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, address: &str, packet: Vec<u8>) -> Result<(), TransportError>;
}

/// Send with a deadline; an elapsed deadline becomes `TransportError::Timeout`
pub async fn send_with_timeout(
    transport: &dyn Transport,
    address: &str,
    packet: Vec<u8>,
    timeout: Duration,
) -> Result<(), TransportError> {
    match tokio::time::timeout(timeout, transport.send(address, packet)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(timeout)),
    }
}

/// In-process transport backed by bounded mpsc channels
#[derive(Debug, Default)]
pub struct MemoryTransport {
    routes: RwLock<HashMap<String, mpsc::Sender<Vec<u8>>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an address and return its inbox
    ///
    /// A full inbox makes senders wait, which is what send timeouts bound.
    pub fn bind(
        &self,
        address: &str,
        capacity: usize,
    ) -> Result<mpsc::Receiver<Vec<u8>>, TransportError> {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        if routes.get(address).is_some_and(|tx| !tx.is_closed()) {
            return Err(TransportError::AddressInUse(address.to_string()));
        }
        let (tx, rx) = mpsc::channel(capacity.max(1));
        routes.insert(address.to_string(), tx);
        debug!("MemoryTransport: bound {}", address);
        Ok(rx)
    }

    /// Drop the route to an address
    pub fn unbind(&self, address: &str) {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(address);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, address: &str, packet: Vec<u8>) -> Result<(), TransportError> {
        let sender = self
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable(address.to_string()))?;

        sender
            .send(packet)
            .await
            .map_err(|_| TransportError::Closed(address.to_string()))
    }
}
