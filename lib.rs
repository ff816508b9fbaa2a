//! # enctempfile - Encrypted Temporary Files
//!
//! enctempfile provides a seekable, randomly addressable temporary file whose
//! contents never reach storage in cleartext. The address space is cut into
//! fixed-size blocks; each block has its own ephemeral XChaCha20-Poly1305 key
//! and is sealed as a whole before any byte is written to its backing store.
//!
//! ## Features
//!
//! - **Per-block keys**: Generated on block creation, held only in memory,
//!   zeroized on close
//! - **Bounded plaintext**: Only blocks in active use are held decrypted
//! - **File semantics**: Read, write, seek, truncate, flush, close, plus the
//!   std `Read`/`Write`/`Seek` traits
//! - **Sparse files**: Unwritten ranges below the end of file read as zeros
//!
//! ## Quick Start
//!
//! ```no_run
//! use enctempfile::{VirtualFile, Whence};
//!
//! fn main() -> enctempfile::Result<()> {
//!     let mut file = VirtualFile::new();
//!
//!     file.write(b"sensitive data")?;
//!     file.flush()?;
//!
//!     file.seek(0, Whence::Set)?;
//!     let data = file.read(None)?;
//!     assert_eq!(data, b"sensitive data");
//!
//!     file.close();
//!     Ok(())
//! }
//! ```
//!
//! Nothing survives the process: keys are never persisted, so closing or
//! dropping the file makes its backing bytes unrecoverable.

pub mod backing_store;
pub mod block;
pub mod config;
pub mod encryptor;
pub mod error;
pub mod key_manager;
pub mod virtual_file;

// Re-export common types for convenience
pub use backing_store::BackingKind;
pub use config::Config;
pub use error::{EncTempFileError, Result};
pub use virtual_file::{VirtualFile, Whence, DEFAULT_BLOCK_SIZE};
