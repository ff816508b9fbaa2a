use std::io;
use thiserror::Error;

/// Errors raised by encrypted temp file operations
#[derive(Debug, Error)]
pub enum EncTempFileError {
    /// Internal consistency failure in block dispatch (never caused by input)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Caller supplied an unusable argument (bad whence, negative position)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation has no implementation for this file type
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Encryption or authentication failure on a block's backing bytes
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Backing store I/O errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Use of a block or file after close
    #[error("Closed: {0}")]
    Closed(String),
}

pub type Result<T> = std::result::Result<T, EncTempFileError>;

impl EncTempFileError {
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::Crypto(msg.into())
    }

    pub fn closed(msg: impl Into<String>) -> Self {
        Self::Closed(msg.into())
    }
}

impl From<io::Error> for EncTempFileError {
    fn from(err: io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<EncTempFileError> for io::Error {
    fn from(err: EncTempFileError) -> Self {
        let kind = match &err {
            EncTempFileError::InvalidArgument(_) => io::ErrorKind::InvalidInput,
            EncTempFileError::Unsupported(_) => io::ErrorKind::Unsupported,
            EncTempFileError::Crypto(_) => io::ErrorKind::InvalidData,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_kinds() {
        let err: io::Error = EncTempFileError::invalid_argument("whence 7").into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let err: io::Error = EncTempFileError::crypto("bad tag").into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let err: io::Error = EncTempFileError::unsupported("fileno").into();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);

        let err: io::Error = EncTempFileError::closed("file").into();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }

    #[test]
    fn test_storage_from_io() {
        let err = EncTempFileError::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(matches!(err, EncTempFileError::Storage(ref m) if m.contains("gone")));
    }
}
