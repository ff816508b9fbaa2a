//! Seekable virtual file spread over independently encrypted blocks.
//!
//! [`VirtualFile`] maps absolute position `p` to block `p / block_size` at
//! local offset `p % block_size`, and fans reads, writes, seeks and truncates
//! out across however many blocks an operation spans. Callers never see a
//! [`Block`].
//!
//! ## Plaintext Lifetime
//!
//! The file tracks the block it last touched. Moving to another block returns
//! the previous one to sealed form, and writes that spill over a block
//! boundary flush the filled block immediately. Sequential use therefore holds
//! one block of plaintext at a time regardless of total file size.
//!
//! ## Sparse Files
//!
//! Blocks exist only where data was written. A missing block below the highest
//! existing index reads as zeros; nothing past the highest block is readable.

use std::collections::BTreeMap;
use std::io::{self, SeekFrom};

use tracing::debug;

use crate::backing_store::BackingKind;
use crate::block::Block;
use crate::config::Config;
use crate::error::{EncTempFileError, Result};

/// 16 MiB
pub const DEFAULT_BLOCK_SIZE: usize = 16 * 1024 * 1024;

/// Reference point for [`VirtualFile::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Absolute position
    Set,
    /// Relative to the current position
    Cur,
    /// Counted back from the logical end of file
    End,
}

impl Whence {
    /// Accepts the POSIX `SEEK_SET`/`SEEK_CUR`/`SEEK_END` values.
    pub fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            0 => Ok(Self::Set),
            1 => Ok(Self::Cur),
            2 => Ok(Self::End),
            other => Err(EncTempFileError::invalid_argument(format!(
                "invalid value for whence {}",
                other
            ))),
        }
    }
}

pub struct VirtualFile {
    blocks: BTreeMap<u64, Block>,
    block_size: usize,
    backing: BackingKind,
    position: u64,
    active: Option<u64>,
    closed: bool,
}

impl std::fmt::Debug for VirtualFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualFile")
            .field("block_size", &self.block_size)
            .field("backing", &self.backing)
            .field("blocks", &self.blocks.len())
            .field("position", &self.position)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Default for VirtualFile {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for VirtualFile {
    fn drop(&mut self) {
        self.close();
    }
}

impl VirtualFile {
    /// Empty file with the default 16 MiB block size.
    pub fn new() -> Self {
        Self {
            blocks: BTreeMap::new(),
            block_size: DEFAULT_BLOCK_SIZE,
            backing: BackingKind::default(),
            position: 0,
            active: None,
            closed: false,
        }
    }

    pub fn with_block_size(block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(EncTempFileError::invalid_argument("block_size must be positive"));
        }
        let mut file = Self::new();
        file.block_size = block_size;
        Ok(file)
    }

    pub fn with_backing(mut self, backing: BackingKind) -> Self {
        self.backing = backing;
        self
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Ok(Self::with_block_size(cfg.block_size)?.with_backing(cfg.backing))
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn readable(&self) -> bool {
        true
    }

    pub fn writable(&self) -> bool {
        true
    }

    pub fn seekable(&self) -> bool {
        true
    }

    pub fn isatty(&self) -> bool {
        false
    }

    /// There is no descriptor-backed implementation; always fails.
    pub fn fileno(&self) -> Result<i32> {
        Err(EncTempFileError::unsupported(
            "no file descriptor: contents live in encrypted blocks",
        ))
    }

    pub fn tell(&self) -> u64 {
        self.position
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(EncTempFileError::closed("I/O operation on closed file"));
        }
        Ok(())
    }

    fn block_index(&self, position: u64) -> u64 {
        position / self.block_size as u64
    }

    fn local_offset(&self, position: u64, index: u64) -> usize {
        (position - index * self.block_size as u64) as usize
    }

    fn max_block_index(&self) -> Option<u64> {
        self.blocks.keys().next_back().copied()
    }

    fn create_block(&mut self, index: u64) -> Result<()> {
        if self.blocks.contains_key(&index) {
            return Err(EncTempFileError::invariant(format!(
                "block already exists for index {}",
                index
            )));
        }
        debug!(index, block_size = self.block_size, "creating block");
        self.blocks
            .insert(index, Block::new(self.block_size, self.backing));
        Ok(())
    }

    fn block_mut(&mut self, index: u64) -> Result<&mut Block> {
        self.blocks
            .get_mut(&index)
            .ok_or_else(|| EncTempFileError::invariant(format!("no block at index {}", index)))
    }

    fn block_or_create(&mut self, index: u64) -> Result<&mut Block> {
        if !self.blocks.contains_key(&index) {
            self.create_block(index)?;
        }
        self.block_mut(index)
    }

    /// Make `index` the working block, sealing the previous one.
    fn touch(&mut self, index: u64) -> Result<()> {
        match self.active {
            Some(prev) if prev == index => return Ok(()),
            Some(prev) => {
                if let Some(block) = self.blocks.get_mut(&prev) {
                    block.release()?;
                }
            }
            None => {}
        }
        self.active = Some(index);
        Ok(())
    }

    /// Logical size: end of the highest block's data.
    pub fn len(&mut self) -> Result<u64> {
        self.ensure_open()?;
        let Some(max) = self.max_block_index() else {
            return Ok(0);
        };

        let is_active = self.active == Some(max);
        let block = self.block_mut(max)?;
        let was_buffered = block.is_buffered();
        let size = block.len()?;
        if !was_buffered && !is_active {
            block.release()?;
        }
        Ok(max * self.block_size as u64 + size as u64)
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Write all of `data` at the current position, splitting across blocks.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        if self.position.checked_add(data.len() as u64).is_none() {
            return Err(EncTempFileError::invalid_argument(format!(
                "write of {} bytes at position {} runs past the addressable range",
                data.len(),
                self.position
            )));
        }
        let mut remaining = data;

        while !remaining.is_empty() {
            let index = self.block_index(self.position);
            let local = self.local_offset(self.position, index);
            let room = self.block_size - local;
            let (chunk, rest) = remaining.split_at(room.min(remaining.len()));

            self.touch(index)?;
            let block = self.block_or_create(index)?;
            block.seek(SeekFrom::Start(local as u64))?;
            block.write(chunk)?;
            if !rest.is_empty() {
                block.flush()?;
            }

            self.position += chunk.len() as u64;
            remaining = rest;
        }

        Ok(data.len())
    }

    /// Read up to `size` bytes, or to end of file for `None`.
    ///
    /// A short read from the highest block is end of file. Holes below it,
    /// whether missing blocks or the unwritten tail of a lower block, read as
    /// zeros.
    pub fn read(&mut self, size: Option<usize>) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let Some(max) = self.max_block_index() else {
            return Ok(Vec::new());
        };
        // Output never reaches past the end of the highest block, so sizing
        // to that bound means no reallocation leaves plaintext behind.
        let block_end = (max as u128 + 1) * self.block_size as u128;
        let bound = block_end.saturating_sub(self.position as u128);
        let bound = size.map_or(bound, |n| bound.min(n as u128));
        let mut out = Vec::with_capacity(usize::try_from(bound).unwrap_or(usize::MAX));
        let mut remaining = size;

        while remaining != Some(0) {
            let index = self.block_index(self.position);
            if index > max {
                break;
            }

            let local = self.local_offset(self.position, index);
            let span = self.block_size - local;
            let want = remaining.map_or(span, |r| r.min(span));

            if self.blocks.contains_key(&index) {
                self.touch(index)?;
                let block = self.block_mut(index)?;
                block.seek(SeekFrom::Start(local as u64))?;
                let got = block.read_into(&mut out, Some(want))?;

                if got < want {
                    if index == max {
                        self.position += got as u64;
                        break;
                    }
                    out.resize(out.len() + (want - got), 0);
                }
            } else {
                out.resize(out.len() + want, 0);
            }

            self.position += want as u64;
            if let Some(r) = remaining.as_mut() {
                *r -= want;
            }
        }

        Ok(out)
    }

    /// Move the cursor; returns the new position.
    ///
    /// `End` places the cursor `offset` bytes before the logical end of file,
    /// and leaves it unchanged when the file has no blocks.
    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        self.ensure_open()?;
        let base = match whence {
            Whence::Set => 0,
            Whence::Cur => self.position as i128,
            Whence::End => {
                if self.max_block_index().is_none() {
                    return Ok(self.position);
                }
                self.len()? as i128
            }
        };
        let target = match whence {
            Whence::End => base - offset as i128,
            _ => base + offset as i128,
        };

        self.position = u64::try_from(target).map_err(|_| {
            EncTempFileError::invalid_argument(format!("seek to invalid position {}", target))
        })?;
        Ok(self.position)
    }

    /// Cut the file at `size` (default: the current position) and return the
    /// new logical size. Blocks past the cut are closed and their keys lost.
    /// The cursor does not move.
    pub fn truncate(&mut self, size: Option<u64>) -> Result<u64> {
        self.ensure_open()?;
        let target = size.unwrap_or(self.position);
        let index = self.block_index(target);
        let local = self.local_offset(target, index);

        let tail = match index.checked_add(1) {
            Some(first_removed) => self.blocks.split_off(&first_removed),
            None => BTreeMap::new(),
        };
        let removed = tail.len();
        for (_, mut block) in tail {
            block.close();
        }
        if self.active.is_some_and(|active| active > index) {
            self.active = None;
        }

        self.touch(index)?;
        let block = self.block_or_create(index)?;
        block.truncate(Some(local))?;
        block.flush()?;

        debug!(size = target, removed, "file truncated");
        Ok(target)
    }

    /// Seal every block. Returns total ciphertext bytes written.
    pub fn flush(&mut self) -> Result<usize> {
        self.ensure_open()?;
        let mut written = 0;
        for block in self.blocks.values_mut() {
            written += block.flush()?;
        }
        debug!(blocks = self.blocks.len(), sealed = written, "file flushed");
        Ok(written)
    }

    /// Discard every block and key. Safe to call any number of times.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        for block in self.blocks.values_mut() {
            block.close();
        }
        let closed = self.blocks.len();
        self.blocks.clear();
        self.active = None;
        self.closed = true;
        debug!(blocks = closed, "file closed");
    }
}

impl io::Read for VirtualFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = VirtualFile::read(self, Some(buf.len()))?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }
}

impl io::Write for VirtualFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(VirtualFile::write(self, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        VirtualFile::flush(self)?;
        Ok(())
    }
}

/// `SeekFrom::End(n)` follows std convention: `n` bytes past the end.
impl io::Seek for VirtualFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let (offset, whence) = match pos {
            SeekFrom::Start(n) => (
                i64::try_from(n).map_err(|_| {
                    EncTempFileError::invalid_argument(format!("offset {} out of range", n))
                })?,
                Whence::Set,
            ),
            SeekFrom::Current(n) => (n, Whence::Cur),
            SeekFrom::End(n) => (
                n.checked_neg().ok_or_else(|| {
                    EncTempFileError::invalid_argument(format!("offset {} out of range", n))
                })?,
                Whence::End,
            ),
        };
        Ok(VirtualFile::seek(self, offset, whence)?)
    }
}
