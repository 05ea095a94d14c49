//! Circuit building for onion routing
//!
//! Chooses an ordered path of distinct nodes and wraps a payload in one
//! envelope layer per hop, innermost first.

use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, info};

use crate::crypto::envelope::{build_layer, EnvelopeError};
use crate::network::directory::DirectorySnapshot;
use crate::NodeId;

/// Errors from circuit operations
#[derive(Debug, Error)]
pub enum CircuitError {
    #[error("Circuit must contain at least one hop")]
    EmptyCircuit,
    #[error("Node {0} appears more than once in the circuit")]
    DuplicateHop(NodeId),
    #[error("Node {0} is not in the directory")]
    UnknownNode(NodeId),
    #[error("Not enough relay nodes available: need {need}, have {have}")]
    NotEnoughRelays { need: usize, have: usize },
    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),
}

/// Layered envelope ready to hand to the entry node
#[derive(Debug, Clone)]
pub struct OnionOutgoing {
    /// First hop
    pub entry_node: NodeId,
    /// Where to send `packet_bytes`
    pub entry_address: String,
    /// Fully layered envelope
    pub packet_bytes: Vec<u8>,
}

/// Wrap `payload` for the path `hops`
///
/// Every hop must be distinct and present in `snapshot`; nothing is
/// encrypted until the whole path has been validated. Hop `i` learns only
/// `hops[i + 1]`; the last hop receives the terminal sentinel.
pub fn build_circuit(
    snapshot: &DirectorySnapshot,
    hops: &[NodeId],
    payload: &[u8],
) -> Result<OnionOutgoing, CircuitError> {
    let entry_node = *hops.first().ok_or(CircuitError::EmptyCircuit)?;

    let mut seen = HashSet::with_capacity(hops.len());
    let mut entries = Vec::with_capacity(hops.len());
    for &hop in hops {
        if !seen.insert(hop) {
            return Err(CircuitError::DuplicateHop(hop));
        }
        let entry = snapshot.get(hop).ok_or(CircuitError::UnknownNode(hop))?;
        entries.push(entry);
    }

    let mut inner = payload.to_vec();
    for (i, entry) in entries.iter().enumerate().rev() {
        let next_hop = hops.get(i + 1).copied().unwrap_or(NodeId::TERMINAL);
        inner = build_layer(&entry.public_key, next_hop, &inner)?;
        debug!("Wrapped layer {} for {} (next: {})", i + 1, entry.node_id, next_hop);
    }

    Ok(OnionOutgoing {
        entry_node,
        entry_address: entries[0].address.clone(),
        packet_bytes: inner,
    })
}

/// Strategy for choosing the path of a circuit
///
/// Implementations return the full path with `destination` last.
pub trait HopSelector: Send + Sync {
    fn select(
        &self,
        snapshot: &DirectorySnapshot,
        origin: NodeId,
        destination: NodeId,
    ) -> Result<Vec<NodeId>, CircuitError>;
}

/// Random distinct relays followed by the destination
#[derive(Debug, Clone)]
pub struct RandomHopSelector {
    /// Intermediate relays before the destination
    pub relay_count: usize,
}

impl RandomHopSelector {
    pub fn new(relay_count: usize) -> Self {
        Self { relay_count }
    }
}

impl HopSelector for RandomHopSelector {
    fn select(
        &self,
        snapshot: &DirectorySnapshot,
        origin: NodeId,
        destination: NodeId,
    ) -> Result<Vec<NodeId>, CircuitError> {
        if !snapshot.contains(destination) {
            return Err(CircuitError::UnknownNode(destination));
        }

        // Neither endpoint may double as a relay
        let mut available: Vec<NodeId> = snapshot
            .node_ids()
            .filter(|&id| id != origin && id != destination)
            .collect();

        debug!(
            "Available relays for circuit: {} (requested: {})",
            available.len(),
            self.relay_count
        );

        if available.len() < self.relay_count {
            return Err(CircuitError::NotEnoughRelays {
                need: self.relay_count,
                have: available.len(),
            });
        }

        available.shuffle(&mut OsRng);
        let mut hops: Vec<NodeId> = available.into_iter().take(self.relay_count).collect();
        hops.push(destination);
        Ok(hops)
    }
}

/// A caller-chosen path, used as-is
#[derive(Debug, Clone)]
pub struct FixedHopSelector {
    pub hops: Vec<NodeId>,
}

impl HopSelector for FixedHopSelector {
    fn select(
        &self,
        _snapshot: &DirectorySnapshot,
        _origin: NodeId,
        destination: NodeId,
    ) -> Result<Vec<NodeId>, CircuitError> {
        let mut hops = self.hops.clone();
        if hops.last() != Some(&destination) {
            hops.push(destination);
        }
        Ok(hops)
    }
}

/// A chosen onion routing path
#[derive(Debug, Clone)]
pub struct Circuit {
    /// Unique circuit ID (per builder)
    pub id: u64,
    /// Hops in order (first = entry, last = destination)
    pub hops: Vec<NodeId>,
    /// Time when circuit was chosen
    pub created_at: u64,
}

impl Circuit {
    /// Wrap a message in this circuit's onion layers
    pub fn wrap_message(
        &self,
        snapshot: &DirectorySnapshot,
        payload: &[u8],
    ) -> Result<OnionOutgoing, CircuitError> {
        build_circuit(snapshot, &self.hops, payload)
    }

    /// Get the entry node (first hop)
    pub fn entry_node(&self) -> Option<NodeId> {
        self.hops.first().copied()
    }
}

/// Chooses circuits with a pluggable selection strategy
pub struct CircuitBuilder {
    selector: Box<dyn HopSelector>,
    next_circuit_id: AtomicU64,
}

impl CircuitBuilder {
    pub fn new(selector: Box<dyn HopSelector>) -> Self {
        Self {
            selector,
            next_circuit_id: AtomicU64::new(1),
        }
    }

    /// Builder using `relay_count` random relays per circuit
    pub fn with_random_hops(relay_count: usize) -> Self {
        Self::new(Box::new(RandomHopSelector::new(relay_count)))
    }

    /// Choose a circuit from `origin` to `destination`
    pub fn plan_circuit(
        &self,
        snapshot: &DirectorySnapshot,
        origin: NodeId,
        destination: NodeId,
    ) -> Result<Circuit, CircuitError> {
        let hops = self.selector.select(snapshot, origin, destination)?;
        let circuit = self.build_with_hops(hops);
        info!("Built circuit {} with {} hops to {}", circuit.id, circuit.hops.len(), destination);
        Ok(circuit)
    }

    /// Build a circuit with specific hops
    pub fn build_with_hops(&self, hops: Vec<NodeId>) -> Circuit {
        Circuit {
            id: self.next_circuit_id.fetch_add(1, Ordering::Relaxed),
            hops,
            created_at: now_ms(),
        }
    }
}

impl std::fmt::Debug for CircuitBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBuilder")
            .field("next_circuit_id", &self.next_circuit_id)
            .finish_non_exhaustive()
    }
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
