//! Containers for a block's ciphertext between flushes.
//!
//! The default store is an anonymous temp file: the OS unlinks it on creation,
//! so it vanishes when the handle is dropped or the process exits. An
//! in-memory store is available for workloads with many small blocks, where
//! one file descriptor per block would be too many.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::Result;

/// Which kind of [`BackingStore`] new blocks allocate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackingKind {
    #[default]
    TempFile,
    Memory,
}

impl std::str::FromStr for BackingKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tempfile" | "temp_file" | "file" => Ok(Self::TempFile),
            "memory" | "mem" => Ok(Self::Memory),
            other => Err(format!("unknown backing kind '{}'", other)),
        }
    }
}

/// Holds exactly one sealed block. Only ever rewritten wholesale.
#[derive(Debug)]
pub enum BackingStore {
    TempFile(File),
    Memory(Vec<u8>),
}

impl BackingStore {
    pub fn create(kind: BackingKind) -> Result<Self> {
        Ok(match kind {
            BackingKind::TempFile => Self::TempFile(tempfile::tempfile()?),
            BackingKind::Memory => Self::Memory(Vec::new()),
        })
    }

    /// Truncate to zero and write `sealed` from offset 0.
    pub fn replace(&mut self, sealed: &[u8]) -> Result<()> {
        match self {
            Self::TempFile(file) => {
                file.seek(SeekFrom::Start(0))?;
                file.set_len(0)?;
                file.write_all(sealed)?;
                file.flush()?;
            }
            Self::Memory(bytes) => {
                bytes.clear();
                bytes.extend_from_slice(sealed);
            }
        }
        Ok(())
    }

    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        match self {
            Self::TempFile(file) => {
                let mut sealed = Vec::new();
                file.seek(SeekFrom::Start(0))?;
                file.read_to_end(&mut sealed)?;
                Ok(sealed)
            }
            Self::Memory(bytes) => Ok(bytes.clone()),
        }
    }

    /// Drop the stored ciphertext but keep the container for the next flush.
    pub fn clear(&mut self) -> Result<()> {
        match self {
            Self::TempFile(file) => {
                file.seek(SeekFrom::Start(0))?;
                file.set_len(0)?;
            }
            Self::Memory(bytes) => bytes.clear(),
        }
        Ok(())
    }

    pub fn len(&self) -> Result<u64> {
        match self {
            Self::TempFile(file) => Ok(file.metadata()?.len()),
            Self::Memory(bytes) => Ok(bytes.len() as u64),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    #[cfg(test)]
    pub(crate) fn corrupt_last_byte(&mut self) -> Result<()> {
        let mut sealed = self.read_all()?;
        if let Some(last) = sealed.last_mut() {
            *last ^= 0xff;
        }
        self.replace(&sealed)
    }
}
