//! Whole-block authenticated encryption.
//!
//! A block is always sealed as one AEAD message; ciphertexts are not
//! appendable, so every flush re-encrypts the full plaintext.
//!
//! ## Sealed Format
//!
//! ```text
//! [nonce:24][ciphertext || tag:16]
//! ```
//!
//! A fresh random nonce is drawn per seal, so repeated flushes under the same
//! block key never reuse a nonce.

use chacha20poly1305::aead::{Aead, AeadCore, OsRng};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use tracing::error;
use zeroize::Zeroizing;

use crate::error::{EncTempFileError, Result};
use crate::key_manager::BlockKey;

pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;

/// Bytes added to a block's plaintext length by sealing
pub const SEAL_OVERHEAD: usize = NONCE_LEN + TAG_LEN;

/// Encrypt `plaintext` under `key`, returning nonce-prefixed ciphertext.
pub fn seal(key: &BlockKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = key
        .cipher()
        .encrypt(&nonce, plaintext)
        .map_err(|e| EncTempFileError::crypto(format!("encryption failed: {}", e)))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Verify and decrypt a sealed block. Fails on tampering, truncation or a
/// foreign key; never returns partial plaintext.
pub fn open(key: &BlockKey, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if sealed.len() < SEAL_OVERHEAD {
        error!(len = sealed.len(), "sealed block shorter than nonce and tag");
        return Err(EncTempFileError::crypto(format!(
            "sealed block too short: {} bytes, need at least {}",
            sealed.len(),
            SEAL_OVERHEAD
        )));
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let nonce = XNonce::from_slice(nonce_bytes);
    let plaintext = key.cipher().decrypt(nonce, ciphertext).map_err(|e| {
        error!(len = sealed.len(), "block authentication failed");
        EncTempFileError::crypto(format!("decryption failed: {}", e))
    })?;

    Ok(Zeroizing::new(plaintext))
}
