//! Key types and their transport-safe text encoding
//!
//! Provides the long-lived RSA node key pair and the per-layer AES-256 key,
//! plus base64 export/import for both (SPKI / PKCS#8 DER for RSA, raw bytes
//! for the symmetric key).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Smallest modulus we are willing to generate
pub const MIN_KEY_BITS: usize = 2048;

/// Default modulus size for node keys
pub const DEFAULT_KEY_BITS: usize = 2048;

/// Length of a symmetric layer key in bytes (AES-256)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Key-related errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum KeyError {
    #[error("Invalid key format: {0}")]
    Format(String),
    #[error("Key size {bits} is below the minimum of {min} bits")]
    TooSmall { bits: usize, min: usize },
    #[error("Key generation failed: {0}")]
    Generation(String),
}

/// A node's asymmetric key pair
///
/// Generated once per node. The public half is published to the directory,
/// the private half never leaves the node.
#[derive(Clone)]
pub struct NodeKeyPair {
    public_key: RsaPublicKey,
    private_key: RsaPrivateKey,
}

impl NodeKeyPair {
    /// Generate a new key pair with the given modulus size
    pub fn generate(bits: usize) -> Result<Self, KeyError> {
        if bits < MIN_KEY_BITS {
            return Err(KeyError::TooSmall { bits, min: MIN_KEY_BITS });
        }
        let private_key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| KeyError::Generation(e.to_string()))?;
        let public_key = private_key.to_public_key();
        Ok(Self { public_key, private_key })
    }

    /// Rebuild a key pair from an exported private key
    pub fn from_exported_private(text: &str) -> Result<Self, KeyError> {
        let private_key = import_private_key(text)?;
        let public_key = private_key.to_public_key();
        Ok(Self { public_key, private_key })
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    /// Split into the two halves
    pub fn into_parts(self) -> (RsaPublicKey, RsaPrivateKey) {
        (self.public_key, self.private_key)
    }
}

impl std::fmt::Debug for NodeKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeKeyPair")
            .field("fingerprint", &crate::public_key_fingerprint(&self.public_key))
            .finish_non_exhaustive()
    }
}

/// Export a public key as base64 SPKI DER
pub fn export_public_key(key: &RsaPublicKey) -> Result<String, KeyError> {
    let der = key
        .to_public_key_der()
        .map_err(|e| KeyError::Format(e.to_string()))?;
    Ok(BASE64.encode(der.as_bytes()))
}

/// Export a private key as base64 PKCS#8 DER
///
/// Returns `None` when no private half is held.
pub fn export_private_key(key: Option<&RsaPrivateKey>) -> Result<Option<String>, KeyError> {
    let Some(key) = key else {
        return Ok(None);
    };
    let der = key
        .to_pkcs8_der()
        .map_err(|e| KeyError::Format(e.to_string()))?;
    Ok(Some(BASE64.encode(der.as_bytes())))
}

/// Import a base64 SPKI DER public key
pub fn import_public_key(text: &str) -> Result<RsaPublicKey, KeyError> {
    let der = decode_base64(text)?;
    RsaPublicKey::from_public_key_der(&der).map_err(|e| KeyError::Format(e.to_string()))
}

/// Import a base64 PKCS#8 DER private key
pub fn import_private_key(text: &str) -> Result<RsaPrivateKey, KeyError> {
    let mut der = decode_base64(text)?;
    let key = RsaPrivateKey::from_pkcs8_der(&der).map_err(|e| KeyError::Format(e.to_string()));
    der.zeroize();
    key
}

fn decode_base64(text: &str) -> Result<Vec<u8>, KeyError> {
    BASE64
        .decode(text.trim())
        .map_err(|e| KeyError::Format(format!("base64: {}", e)))
}

/// Per-layer AES-256 key
///
/// Generated fresh for every envelope layer and wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; SYMMETRIC_KEY_SIZE]);

impl SymmetricKey {
    /// Generate a random 256-bit key
    pub fn generate() -> Self {
        let mut key = [0u8; SYMMETRIC_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_SIZE] {
        &self.0
    }

    /// Export as base64 of the raw key bytes
    pub fn export(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Import from base64 of the raw key bytes
    pub fn import(text: &str) -> Result<Self, KeyError> {
        let mut bytes = decode_base64(text)?;
        if bytes.len() != SYMMETRIC_KEY_SIZE {
            let len = bytes.len();
            bytes.zeroize();
            return Err(KeyError::Format(format!(
                "symmetric key must be {} bytes, got {}",
                SYMMETRIC_KEY_SIZE, len
            )));
        }
        let mut key = [0u8; SYMMETRIC_KEY_SIZE];
        key.copy_from_slice(&bytes);
        bytes.zeroize();
        Ok(Self(key))
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}
