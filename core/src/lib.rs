//! Onion Relay Core Library
//!
//! Provides layered hybrid encryption (RSA-OAEP wrapped AES-256-CBC),
//! circuit construction, and a stateless per-hop relay engine for an
//! onion-routing overlay.

use rsa::pkcs8::EncodePublicKey;
use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// Modules
pub mod crypto;
pub mod network;
pub mod privacy;
pub mod logger;

// Re-export logger types
pub use logger::{init_logger, init_tracing, LogSink};

// Re-export crypto types
pub use crypto::{build_layer, peel_layer, EnvelopeError, KeyError, NodeKeyPair, PeeledLayer, SymmetricKey};

// Re-export network types
pub use network::{
    send_with_timeout, Directory, DirectoryEntry, DirectoryError, DirectorySnapshot,
    InMemoryDirectory, MemoryTransport, NodeConfig, NodeError, RelayNode, Transport,
    TransportError,
};

// Re-export privacy types
pub use privacy::{
    build_circuit, Capabilities, ChannelObserver, Circuit, CircuitBuilder, CircuitError,
    DeliveryObserver, FixedHopSelector, HopSelector, NoopObserver, OnionOutgoing, PrivacyConfig,
    PrivacyError, PrivacyManager, RandomHopSelector, RelayAction, RelayError, RelayHandler,
    RelayOutcome, RelayStats,
};

/// Identifier of a node in the overlay
///
/// Written on the wire as exactly ten zero-padded ASCII digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// Width of the next-hop field inside an envelope
    pub const WIRE_SIZE: usize = 10;

    /// Reserved next hop meaning "deliver here"
    pub const TERMINAL: NodeId = NodeId(u32::MAX);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn is_terminal(&self) -> bool {
        *self == Self::TERMINAL
    }

    /// Fixed-width wire form
    pub fn to_wire(&self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out.copy_from_slice(format!("{:010}", self.0).as_bytes());
        out
    }

    /// Parse the fixed-width wire form; `None` unless all ten bytes are digits
    pub fn from_wire(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::WIRE_SIZE || !bytes.iter().all(u8::is_ascii_digit) {
            return None;
        }
        let text = std::str::from_utf8(bytes).ok()?;
        text.parse::<u32>().ok().map(Self)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_terminal() {
            f.write_str("terminal")
        } else {
            write!(f, "node-{}", self.0)
        }
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Get a human-readable fingerprint of a public key
///
/// Returns a truncated SHA-256 hash of the SPKI encoding formatted as
/// groups of 4 hex chars, e.g. "A1B2-C3D4-E5F6-0718"
pub fn public_key_fingerprint(key: &RsaPublicKey) -> String {
    let der = match key.to_public_key_der() {
        Ok(der) => der,
        Err(_) => return String::from("????-????-????-????"),
    };
    let hash = Sha256::digest(der.as_bytes());

    // Take first 8 bytes (16 hex chars) and format nicely
    let hex_str = hex::encode_upper(&hash[..8]);
    hex_str
        .as_bytes()
        .chunks(4)
        .filter_map(|c| std::str::from_utf8(c).ok())
        .collect::<Vec<_>>()
        .join("-")
}
