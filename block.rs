//! A single fixed-capacity, independently keyed segment of a virtual file.
//!
//! A [`Block`] is in exactly one of four states:
//!
//! - `Empty`: never materialized and never flushed
//! - `Buffered`: plaintext is in memory and is the authoritative content
//! - `Flushed`: the only copy is the sealed ciphertext in the backing store
//! - `Closed`: key and storage discarded, every call fails
//!
//! Any cursor operation materializes the buffer first, decrypting the backing
//! store when there is one. A buffered block keeps its store only while the
//! two agree; the first mutation clears the stored ciphertext.

use std::io::SeekFrom;
use std::mem;

use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::backing_store::{BackingKind, BackingStore};
use crate::encryptor;
use crate::error::{EncTempFileError, Result};
use crate::key_manager::BlockKey;

/// In-memory plaintext with a file-style cursor.
///
/// Growth moves into a fresh zeroizing allocation so the old allocation is
/// wiped instead of being released with plaintext in it.
struct PlainBuffer {
    data: Zeroizing<Vec<u8>>,
    pos: usize,
}

impl Default for PlainBuffer {
    fn default() -> Self {
        Self::from_plaintext(Zeroizing::new(Vec::new()))
    }
}

impl PlainBuffer {
    fn from_plaintext(data: Zeroizing<Vec<u8>>) -> Self {
        Self { data, pos: 0 }
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn as_slice(&self) -> &[u8] {
        &self.data
    }

    fn reserve(&mut self, needed: usize, limit: usize) {
        if needed <= self.data.capacity() {
            return;
        }
        let target = needed.max(self.data.capacity() * 2).min(limit.max(needed));
        let mut grown = Zeroizing::new(Vec::with_capacity(target));
        grown.extend_from_slice(&self.data);
        self.data = grown;
    }

    fn write(&mut self, bytes: &[u8], limit: usize) {
        let end = self.pos + bytes.len();
        self.reserve(end.max(self.data.len()), limit);
        if self.pos > self.data.len() {
            self.data.resize(self.pos, 0);
        }
        let overlap = self.data.len().min(end) - self.pos;
        self.data[self.pos..self.pos + overlap].copy_from_slice(&bytes[..overlap]);
        self.data.extend_from_slice(&bytes[overlap..]);
        self.pos = end;
    }

    /// Append up to `n` bytes from the cursor to `out`.
    fn read_into(&mut self, out: &mut Vec<u8>, n: Option<usize>) -> usize {
        if self.pos >= self.data.len() {
            return 0;
        }
        let available = self.data.len() - self.pos;
        let take = n.map_or(available, |n| n.min(available));
        out.extend_from_slice(&self.data[self.pos..self.pos + take]);
        self.pos += take;
        take
    }

    fn seek(&mut self, target: SeekFrom) -> Result<u64> {
        let next = match target {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.pos as i128 + delta as i128,
            SeekFrom::End(delta) => self.data.len() as i128 + delta as i128,
        };
        if next < 0 {
            return Err(EncTempFileError::invalid_argument(format!(
                "seek to negative position {}",
                next
            )));
        }
        self.pos = usize::try_from(next).map_err(|_| {
            EncTempFileError::invalid_argument(format!("position {} out of range", next))
        })?;
        Ok(self.pos as u64)
    }

    /// `ftruncate` semantics: shrink, or zero-extend. The cursor stays put.
    fn set_len(&mut self, size: usize, limit: usize) {
        if size > self.data.len() {
            self.reserve(size, limit);
        }
        self.data.resize(size, 0);
    }
}

enum State {
    Empty,
    Buffered {
        buffer: PlainBuffer,
        store: Option<BackingStore>,
        dirty: bool,
    },
    Flushed(BackingStore),
    Closed,
}

/// One `capacity`-byte segment of the virtual address space.
pub struct Block {
    capacity: usize,
    backing: BackingKind,
    key: Option<BlockKey>,
    state: State,
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            State::Empty => "empty",
            State::Buffered { dirty: true, .. } => "buffered (dirty)",
            State::Buffered { .. } => "buffered",
            State::Flushed(_) => "flushed",
            State::Closed => "closed",
        };
        f.debug_struct("Block")
            .field("capacity", &self.capacity)
            .field("backing", &self.backing)
            .field("state", &state)
            .finish()
    }
}

impl Block {
    pub fn new(capacity: usize, backing: BackingKind) -> Self {
        Self {
            capacity,
            backing,
            key: Some(BlockKey::generate()),
            state: State::Empty,
        }
    }

    pub fn is_buffered(&self) -> bool {
        matches!(self.state, State::Buffered { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    fn closed_error() -> EncTempFileError {
        EncTempFileError::closed("block used after close")
    }

    fn decrypt_store(&mut self) -> Result<PlainBuffer> {
        let key = self.key.as_ref().ok_or_else(Self::closed_error)?;
        let State::Flushed(store) = &mut self.state else {
            return Err(EncTempFileError::invariant("decrypt requested without a backing store"));
        };

        let sealed = store.read_all()?;
        let plaintext = encryptor::open(key, &sealed)?;
        if plaintext.len() > self.capacity {
            return Err(EncTempFileError::invariant(format!(
                "decrypted block holds {} bytes, capacity is {}",
                plaintext.len(),
                self.capacity
            )));
        }
        trace!(sealed = sealed.len(), plaintext = plaintext.len(), "block materialized");
        Ok(PlainBuffer::from_plaintext(plaintext))
    }

    fn materialize(&mut self) -> Result<&mut PlainBuffer> {
        match self.state {
            State::Buffered { .. } => {}
            State::Closed => return Err(Self::closed_error()),
            State::Empty => {
                self.state = State::Buffered {
                    buffer: PlainBuffer::default(),
                    store: None,
                    dirty: false,
                };
            }
            State::Flushed(_) => {
                let buffer = self.decrypt_store()?;
                if let State::Flushed(store) = mem::replace(&mut self.state, State::Empty) {
                    self.state = State::Buffered {
                        buffer,
                        store: Some(store),
                        dirty: false,
                    };
                }
            }
        }

        match &mut self.state {
            State::Buffered { buffer, .. } => Ok(buffer),
            _ => Err(EncTempFileError::invariant("block failed to materialize")),
        }
    }

    /// Materialize for mutation: stored ciphertext no longer matches.
    fn materialize_dirty(&mut self) -> Result<&mut PlainBuffer> {
        self.materialize()?;
        match &mut self.state {
            State::Buffered {
                buffer,
                store,
                dirty,
            } => {
                if !*dirty {
                    if let Some(store) = store.as_mut() {
                        store.clear()?;
                    }
                    *dirty = true;
                }
                Ok(buffer)
            }
            _ => Err(EncTempFileError::invariant("block failed to materialize")),
        }
    }

    /// Write at the block cursor. Exceeding capacity is a dispatch defect and
    /// is rejected before any byte is applied.
    pub fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        let capacity = self.capacity;
        let buffer = self.materialize()?;
        if bytes.is_empty() {
            return Ok(0);
        }

        let projected = buffer.len().max(buffer.pos + bytes.len());
        if projected > capacity {
            return Err(EncTempFileError::invariant(format!(
                "write of {} bytes at offset {} would grow block to {} bytes, capacity is {}",
                bytes.len(),
                buffer.pos,
                projected,
                capacity
            )));
        }

        self.materialize_dirty()?.write(bytes, capacity);
        Ok(bytes.len())
    }

    /// Read up to `n` bytes (or to the end of the buffer for `None`).
    pub fn read(&mut self, n: Option<usize>) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.read_into(&mut out, n)?;
        Ok(out)
    }

    /// Like [`read`](Self::read), appending into a caller-owned buffer.
    /// Returns the number of bytes appended.
    pub fn read_into(&mut self, out: &mut Vec<u8>, n: Option<usize>) -> Result<usize> {
        Ok(self.materialize()?.read_into(out, n))
    }

    pub fn seek(&mut self, target: SeekFrom) -> Result<u64> {
        self.materialize()?.seek(target)
    }

    pub fn tell(&mut self) -> Result<u64> {
        Ok(self.materialize()?.pos as u64)
    }

    /// Materialized size; does not move the cursor.
    pub fn len(&mut self) -> Result<usize> {
        Ok(self.materialize()?.len())
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Resize to `size` (default: the cursor). Returns the new size.
    pub fn truncate(&mut self, size: Option<usize>) -> Result<usize> {
        let capacity = self.capacity;
        let size = match size {
            Some(size) => size,
            None => self.materialize()?.pos,
        };
        if size > capacity {
            return Err(EncTempFileError::invariant(format!(
                "truncate to {} bytes exceeds block capacity {}",
                size, capacity
            )));
        }
        self.materialize_dirty()?.set_len(size, capacity);
        Ok(size)
    }

    /// Seal the buffer into the backing store and drop the plaintext.
    /// Returns ciphertext bytes written; 0 when nothing was materialized.
    pub fn flush(&mut self) -> Result<usize> {
        let backing = self.backing;
        let key = match (&self.state, self.key.as_ref()) {
            (State::Closed, _) | (_, None) => return Err(Self::closed_error()),
            (State::Buffered { .. }, Some(key)) => key,
            _ => return Ok(0),
        };
        let State::Buffered { buffer, store, .. } = &mut self.state else {
            return Ok(0);
        };

        let sealed = encryptor::seal(key, buffer.as_slice())?;
        if store.is_none() {
            *store = Some(BackingStore::create(backing)?);
        }
        if let Some(store) = store.as_mut() {
            store.replace(&sealed)?;
        }
        let plaintext_len = buffer.len();

        if let State::Buffered {
            store: Some(store), ..
        } = mem::replace(&mut self.state, State::Empty)
        {
            self.state = State::Flushed(store);
        }

        debug!(plaintext = plaintext_len, sealed = sealed.len(), "block flushed");
        Ok(sealed.len())
    }

    /// Return to sealed form. Clean buffers are dropped without re-sealing.
    pub fn release(&mut self) -> Result<()> {
        match self.state {
            State::Buffered { dirty: true, .. } => {
                self.flush()?;
            }
            State::Buffered { dirty: false, .. } => {
                if let State::Buffered { store, .. } = mem::replace(&mut self.state, State::Empty) {
                    self.state = match store {
                        Some(store) => State::Flushed(store),
                        None => State::Empty,
                    };
                }
                trace!("clean block released");
            }
            State::Empty | State::Flushed(_) => {}
            State::Closed => return Err(Self::closed_error()),
        }
        Ok(())
    }

    /// Discard buffer, backing store and key. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        self.state = State::Closed;
        self.key = None;
        trace!(capacity = self.capacity, "block closed");
    }

    #[cfg(test)]
    pub(crate) fn corrupt_sealed(&mut self) -> Result<()> {
        match self.store_mut() {
            Some(store) => store.corrupt_last_byte(),
            None => Err(EncTempFileError::invariant("block has no sealed bytes")),
        }
    }

    #[cfg(test)]
    fn store_mut(&mut self) -> Option<&mut BackingStore> {
        match &mut self.state {
            State::Flushed(store) => Some(store),
            State::Buffered { store, .. } => store.as_mut(),
            _ => None,
        }
    }
}
