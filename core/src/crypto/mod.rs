//! Layered hybrid encryption for onion routing
//!
//! Provides:
//! - Node key pairs and per-layer symmetric keys with base64 export/import
//! - Building and peeling a single RSA-OAEP + AES-256-CBC envelope layer

pub mod keys;
pub mod envelope;

pub use keys::{
    export_private_key, export_public_key, import_private_key, import_public_key,
    KeyError, NodeKeyPair, SymmetricKey, DEFAULT_KEY_BITS, MIN_KEY_BITS,
};
pub use envelope::{build_layer, peel_layer, EnvelopeError, PeeledLayer};


#[cfg(test)]
mod tests;
