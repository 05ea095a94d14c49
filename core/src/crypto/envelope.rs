//! Hybrid envelope codec
//!
//! Builds and peels a single onion layer. Wire format:
//!
//! ```text
//! Envelope       := u32_be(len(AsymCiphertext)) || AsymCiphertext || IV(16) || SymCiphertext
//! AsymCiphertext := RSA-OAEP-SHA256(base64(SymKey), hopPublicKey)
//! SymCiphertext  := AES-256-CBC-PKCS7(NextHopId(10 digits) || InnerPayload, SymKey, IV)
//! ```
//!
//! CBC is not authenticated: corrupting the symmetric region is detected only
//! when it breaks the padding or the hop id field.

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroize;

use crate::crypto::keys::SymmetricKey;
use crate::NodeId;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Size of the big-endian length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// CBC initialization vector size
pub const IV_SIZE: usize = 16;

/// AES block size
pub const BLOCK_SIZE: usize = 16;

/// Errors from envelope operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("Failed to encrypt layer: {0}")]
    Encrypt(String),
    #[error("Failed to decrypt layer: {0}")]
    Decrypt(&'static str),
}

/// Result of peeling one layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeeledLayer {
    /// Where the inner payload goes next, or `NodeId::TERMINAL`
    pub next_hop: NodeId,
    /// Either the next envelope or the final plaintext
    pub payload: Vec<u8>,
}

/// Wrap `inner` in one layer addressed to the holder of `hop_public_key`
///
/// A fresh symmetric key and IV are drawn for every call, so two layers
/// built from identical arguments never share bytes.
pub fn build_layer(
    hop_public_key: &RsaPublicKey,
    next_hop: NodeId,
    inner: &[u8],
) -> Result<Vec<u8>, EnvelopeError> {
    let key = SymmetricKey::generate();
    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);

    let mut plaintext = Vec::with_capacity(NodeId::WIRE_SIZE + inner.len());
    plaintext.extend_from_slice(&next_hop.to_wire());
    plaintext.extend_from_slice(inner);

    let sym_ciphertext = Aes256CbcEnc::new_from_slices(key.as_bytes(), &iv)
        .map_err(|e| EnvelopeError::Encrypt(e.to_string()))?
        .encrypt_padded_vec_mut::<Pkcs7>(&plaintext);
    plaintext.zeroize();

    let mut exported_key = key.export();
    let asym_ciphertext = hop_public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), exported_key.as_bytes())
        .map_err(|e| EnvelopeError::Encrypt(e.to_string()));
    exported_key.zeroize();
    let asym_ciphertext = asym_ciphertext?;

    let asym_len = u32::try_from(asym_ciphertext.len())
        .map_err(|_| EnvelopeError::Encrypt("asymmetric ciphertext too large".into()))?;

    let mut envelope = Vec::with_capacity(
        LENGTH_PREFIX_SIZE + asym_ciphertext.len() + IV_SIZE + sym_ciphertext.len(),
    );
    envelope.extend_from_slice(&asym_len.to_be_bytes());
    envelope.extend_from_slice(&asym_ciphertext);
    envelope.extend_from_slice(&iv);
    envelope.extend_from_slice(&sym_ciphertext);
    Ok(envelope)
}

/// Peel exactly one layer with the local private key
pub fn peel_layer(
    hop_private_key: &RsaPrivateKey,
    envelope: &[u8],
) -> Result<PeeledLayer, EnvelopeError> {
    let (asym_ciphertext, sym_part) = split_envelope(envelope)?;

    // Blinded: the ciphertext comes from the network
    let mut exported_key = hop_private_key
        .decrypt_blinded(&mut OsRng, Oaep::new::<Sha256>(), asym_ciphertext)
        .map_err(|_| EnvelopeError::Decrypt("key unwrap failed"))?;
    let key = std::str::from_utf8(&exported_key)
        .ok()
        .and_then(|text| SymmetricKey::import(text).ok());
    exported_key.zeroize();
    let key = key.ok_or(EnvelopeError::Decrypt("unwrapped key is malformed"))?;

    let (iv, ciphertext) = sym_part.split_at(IV_SIZE);
    let mut plaintext = Aes256CbcDec::new_from_slices(key.as_bytes(), iv)
        .map_err(|_| EnvelopeError::Decrypt("invalid iv"))?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| EnvelopeError::Decrypt("bad padding"))?;

    if plaintext.len() < NodeId::WIRE_SIZE {
        plaintext.zeroize();
        return Err(EnvelopeError::Decrypt("missing next hop"));
    }
    let Some(next_hop) = NodeId::from_wire(&plaintext[..NodeId::WIRE_SIZE]) else {
        plaintext.zeroize();
        return Err(EnvelopeError::Decrypt("malformed next hop"));
    };
    let payload = plaintext.split_off(NodeId::WIRE_SIZE);
    Ok(PeeledLayer { next_hop, payload })
}

/// Split an envelope into its asymmetric and `IV || ciphertext` regions
fn split_envelope(envelope: &[u8]) -> Result<(&[u8], &[u8]), EnvelopeError> {
    if envelope.len() < LENGTH_PREFIX_SIZE {
        return Err(EnvelopeError::Decrypt("truncated length prefix"));
    }
    let (prefix, rest) = envelope.split_at(LENGTH_PREFIX_SIZE);
    let asym_len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    if asym_len == 0 || asym_len > rest.len() {
        return Err(EnvelopeError::Decrypt("bad length prefix"));
    }
    let (asym, sym) = rest.split_at(asym_len);
    if sym.len() < IV_SIZE + BLOCK_SIZE || (sym.len() - IV_SIZE) % BLOCK_SIZE != 0 {
        return Err(EnvelopeError::Decrypt("truncated symmetric ciphertext"));
    }
    Ok((asym, sym))
}
