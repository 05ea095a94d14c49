//! Privacy module for onion routing
//!
//! Provides:
//! - Circuit construction with pluggable hop selection
//! - Stateless relay handling (peel one layer, forward or deliver)
//! - Delivery notification
//! - High-level privacy manager

pub mod circuit;
pub mod relay;
pub mod delivery;
pub mod manager;

// Re-export main types
pub use circuit::{
    build_circuit, Circuit, CircuitBuilder, CircuitError, FixedHopSelector, HopSelector,
    OnionOutgoing, RandomHopSelector,
};
pub use relay::{Capabilities, RelayAction, RelayError, RelayHandler, RelayStats};
pub use delivery::{ChannelObserver, DeliveryObserver, NoopObserver};
pub use manager::{PrivacyConfig, PrivacyError, PrivacyManager, RelayOutcome};
