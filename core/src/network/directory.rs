//! Node directory
//!
//! Maps node ids to their published public key and network address.
//! Circuit construction works against an immutable snapshot taken once per
//! circuit; staleness is the directory's problem, not the caller's.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use rsa::RsaPublicKey;
use thiserror::Error;
use tracing::{debug, info};

use crate::crypto::keys::{import_public_key, KeyError};
use crate::NodeId;

/// Errors from directory operations
#[derive(Debug, Clone, Error)]
pub enum DirectoryError {
    #[error("Node {0} is already registered")]
    DuplicateNode(NodeId),
    #[error("Node {0} is not registered")]
    NotFound(NodeId),
    #[error("Node id {0} is reserved")]
    ReservedId(NodeId),
    #[error("Node address is required")]
    MissingAddress,
    #[error("Invalid public key: {0}")]
    Key(#[from] KeyError),
}

/// A registered node
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryEntry {
    pub node_id: NodeId,
    pub public_key: RsaPublicKey,
    pub address: String,
}

/// Lookup service for node keys and addresses
pub trait Directory: Send + Sync {
    /// Register a node; ids are unique
    fn register(
        &self,
        node_id: NodeId,
        public_key: RsaPublicKey,
        address: String,
    ) -> Result<(), DirectoryError>;

    /// Look up a single node
    fn get(&self, node_id: NodeId) -> Result<DirectoryEntry, DirectoryError>;

    /// All registered nodes in ascending id order
    fn list(&self) -> Vec<DirectoryEntry>;

    /// Take an immutable point-in-time copy
    fn snapshot(&self) -> DirectorySnapshot {
        DirectorySnapshot::from_entries(self.list())
    }
}

/// Point-in-time view of the directory
#[derive(Debug, Clone, Default)]
pub struct DirectorySnapshot {
    entries: BTreeMap<NodeId, DirectoryEntry>,
}

impl DirectorySnapshot {
    pub fn from_entries(entries: impl IntoIterator<Item = DirectoryEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.node_id, e)).collect(),
        }
    }

    pub fn get(&self, node_id: NodeId) -> Option<&DirectoryEntry> {
        self.entries.get(&node_id)
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.entries.contains_key(&node_id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Directory held in process memory
///
/// Readers share the lock; registration takes it exclusively.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    nodes: RwLock<BTreeMap<NodeId, DirectoryEntry>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node whose public key arrives in exported text form
    pub fn register_exported(
        &self,
        node_id: NodeId,
        public_key: &str,
        address: String,
    ) -> Result<(), DirectoryError> {
        let public_key = import_public_key(public_key)?;
        self.register(node_id, public_key, address)
    }

    pub fn count(&self) -> usize {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Directory for InMemoryDirectory {
    fn register(
        &self,
        node_id: NodeId,
        public_key: RsaPublicKey,
        address: String,
    ) -> Result<(), DirectoryError> {
        if node_id.is_terminal() {
            return Err(DirectoryError::ReservedId(node_id));
        }
        if address.trim().is_empty() {
            return Err(DirectoryError::MissingAddress);
        }

        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        if nodes.contains_key(&node_id) {
            debug!("Rejecting duplicate registration for {}", node_id);
            return Err(DirectoryError::DuplicateNode(node_id));
        }

        info!(
            "Registered {} at {} (key {})",
            node_id,
            address,
            crate::public_key_fingerprint(&public_key)
        );
        nodes.insert(node_id, DirectoryEntry { node_id, public_key, address });
        Ok(())
    }

    fn get(&self, node_id: NodeId) -> Result<DirectoryEntry, DirectoryError> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&node_id)
            .cloned()
            .ok_or(DirectoryError::NotFound(node_id))
    }

    fn list(&self) -> Vec<DirectoryEntry> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}
