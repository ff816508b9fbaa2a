//! Per-block ephemeral keys.
//!
//! Every [`Block`](crate::block::Block) owns exactly one [`BlockKey`]. Keys are
//! generated from `OsRng` when the block is created, never written anywhere,
//! and wiped when the block is closed or dropped. Losing the key makes the
//! block's backing bytes unrecoverable.

use chacha20poly1305::{KeyInit, XChaCha20Poly1305};
use rand_core::OsRng;
use rand_core::RngCore;
use zeroize::Zeroize;

pub const KEY_LEN: usize = 32;

/// 256-bit XChaCha20-Poly1305 key held only in memory.
pub struct BlockKey {
    key_bytes: [u8; KEY_LEN],
}

impl Drop for BlockKey {
    fn drop(&mut self) {
        self.key_bytes.zeroize();
    }
}

impl std::fmt::Debug for BlockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockKey").finish_non_exhaustive()
    }
}

impl BlockKey {
    /// Draw a fresh key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut key_bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key_bytes);
        Self { key_bytes }
    }

    pub fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(&self.key_bytes.into())
    }

    #[cfg(test)]
    pub(crate) fn from_bytes(key_bytes: [u8; KEY_LEN]) -> Self {
        Self { key_bytes }
    }
}
