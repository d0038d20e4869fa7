//! Error types for the barrel storage engine.
//!
//! All fallible operations return [`BarrelError`]. Storage failures and
//! on-disk corruption are kept apart so that callers can tell a broken disk
//! from a broken file. Conditions that are expected during normal operation,
//! such as an absent term, an exhausted posting list or a cache that cannot
//! admit a block, are reported through `Option`/`bool` instead.
//!
//! # Examples
//!
//! ```
//! use barrels::error::{BarrelError, Result};
//!
//! fn check_header(magic: u32) -> Result<()> {
//!     if magic != 0x4252_4C53 {
//!         return Err(BarrelError::corruption("bad magic"));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_header(0).is_err());
//! ```

use std::io;

use thiserror::Error;

use crate::storage::StorageError;

/// The main error type for barrel operations.
#[derive(Error, Debug)]
pub enum BarrelError {
    /// I/O errors raised while reading or writing storage.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A storage backend failed to open, list or publish a file.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The bytes on storage do not describe a valid structure.
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// The engine was used in a way its state does not allow.
    #[error("Index error: {0}")]
    Index(String),

    /// A caller supplied an argument outside the accepted domain.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// JSON serialization/deserialization errors (configuration files).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases.
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for operations that may fail with [`BarrelError`].
pub type Result<T> = std::result::Result<T, BarrelError>;

impl BarrelError {
    /// Create a new storage error for a backend that cannot serve requests.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        BarrelError::Storage(StorageError::Unavailable(msg.into()))
    }

    /// Create a new corruption error.
    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        BarrelError::Corruption(msg.into())
    }

    /// Create a new index error.
    pub fn index<S: Into<String>>(msg: S) -> Self {
        BarrelError::Index(msg.into())
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        BarrelError::InvalidArgument(msg.into())
    }

    /// Create a new invalid config error.
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        BarrelError::InvalidArgument(format!("invalid configuration: {}", msg.into()))
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        BarrelError::Other(msg.into())
    }

    /// Returns true if a file the operation needed does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BarrelError::Storage(StorageError::NotFound(_)))
    }

    /// Returns true if this error signals damaged on-disk data.
    pub fn is_corruption(&self) -> bool {
        matches!(self, BarrelError::Corruption(_))
    }

    /// Map a short read into a corruption error; other I/O errors are kept.
    ///
    /// Every structure read by this crate records its own length, so running
    /// off the end of a file means the file is damaged rather than the disk.
    pub fn from_truncated(err: io::Error, what: &str) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            BarrelError::Corruption(format!("truncated {what}"))
        } else {
            BarrelError::Io(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let error = BarrelError::index("writer already attached");
        assert_eq!(error.to_string(), "Index error: writer already attached");

        let error = BarrelError::corruption("bad footer");
        assert_eq!(error.to_string(), "Corruption detected: bad footer");
        assert!(error.is_corruption());

        let error = BarrelError::invalid_config("chunk size is zero");
        assert_eq!(
            error.to_string(),
            "Invalid argument: invalid configuration: chunk size is zero"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let barrel_error = BarrelError::from(io_error);

        match barrel_error {
            BarrelError::Io(_) => {} // Expected
            _ => panic!("Expected IO error variant"),
        }
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let error = BarrelError::from(StorageError::NotFound("_0.fdi".to_string()));
        assert!(error.is_not_found());
        assert_eq!(error.to_string(), "Storage error: file not found: _0.fdi");
        assert!(!BarrelError::storage("closed").is_not_found());
    }

    #[test]
    fn test_truncated_read_is_corruption() {
        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert!(BarrelError::from_truncated(eof, "posting").is_corruption());

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(!BarrelError::from_truncated(denied, "posting").is_corruption());
    }
}
