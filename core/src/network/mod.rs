//! Network plumbing for the overlay
//!
//! Provides:
//! - The node directory (id -> public key + address)
//! - Packet transport with per-send deadlines
//! - Node configuration and the running node loop

mod config;
pub mod directory;
pub mod relay_node;
pub mod transport;

pub use config::NodeConfig;
pub use directory::{Directory, DirectoryEntry, DirectoryError, DirectorySnapshot, InMemoryDirectory};
pub use relay_node::{NodeError, RelayNode};
pub use transport::{send_with_timeout, MemoryTransport, Transport, TransportError};
