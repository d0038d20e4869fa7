//! Storage abstraction trait and common types.
//!
//! Barrels are written and read by name through a [`Storage`]. The engine
//! never touches paths directly, so the same code runs over the in-memory
//! backend used by tests and the file backend used in production.
//!
//! Files are write-once: an output is filled sequentially and published by
//! [`StorageOutput::close`]; afterwards the file is only read, at arbitrary
//! offsets, until it is deleted. The one file that is replaced in place, the
//! barrel directory, is written under a temporary name and renamed over the
//! old copy.

use std::io::{self, Read, Seek, SeekFrom, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{BarrelError, Result};

/// A named collection of write-once byte files.
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Open a published file for reading.
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>>;

    /// Start writing a file. Any file already called `name` is replaced.
    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>>;

    fn file_exists(&self, name: &str) -> bool;

    /// Delete a file. Deleting a missing file is not an error.
    fn delete_file(&self, name: &str) -> Result<()>;

    /// Names of every file, sorted.
    fn list_files(&self) -> Result<Vec<String>>;

    fn file_size(&self, name: &str) -> Result<u64>;

    /// Rename a file, replacing any file already called `new_name`.
    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()>;

    /// Make renames and deletions durable.
    fn sync(&self) -> Result<()>;
}

/// Random-access reader over one published file.
pub trait StorageInput: Read + Seek + Send + std::fmt::Debug {
    fn size(&self) -> Result<u64>;

    /// Read exactly `buf.len()` bytes starting at `offset`.
    ///
    /// A range that runs past the end of the file is reported as
    /// corruption: callers only ask for ranges recorded in the file itself.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.size()?)?;
        self.seek(SeekFrom::Start(offset))?;
        self.read_exact(buf)
            .map_err(|e| BarrelError::from_truncated(e, "read"))
    }
}

/// Reject a read of `len` bytes at `offset` from a file of `size` bytes
/// that does not fit.
pub(crate) fn check_range(offset: u64, len: usize, size: u64) -> Result<()> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(BarrelError::corruption(format!(
            "read of {len} bytes at offset {offset} exceeds file size {size}"
        ))),
    }
}

/// Sequential writer of one file.
pub trait StorageOutput: Write + Send + std::fmt::Debug {
    /// Flush buffered bytes and force them to the device.
    fn flush_and_sync(&mut self) -> Result<()>;

    /// Number of bytes written so far.
    fn position(&self) -> u64;

    /// Publish the file. Writes after close fail; closing twice is a no-op.
    fn close(&mut self) -> Result<()>;
}

impl StorageOutput for Box<dyn StorageOutput> {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.as_mut().flush_and_sync()
    }

    fn position(&self) -> u64 {
        self.as_ref().position()
    }

    fn close(&mut self) -> Result<()> {
        self.as_mut().close()
    }
}

impl StorageInput for Box<dyn StorageInput> {
    fn size(&self) -> Result<u64> {
        self.as_ref().size()
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.as_mut().read_at(offset, buf)
    }
}

/// Configuration for storage backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Read and write buffer size of file inputs and outputs.
    pub buffer_size: usize,

    /// Sync every output on close and the directory after renames.
    pub sync_writes: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            buffer_size: 64 * 1024, // one posting-cache block
            sync_writes: false,
        }
    }
}

/// Failures of a storage backend.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("file not found: {0}")]
    NotFound(String),

    /// An operating-system call on a named file failed.
    #[error("cannot {op} {name}: {source}")]
    Io {
        op: &'static str,
        name: String,
        #[source]
        source: io::Error,
    },

    /// The backend cannot serve requests.
    #[error("{0}")]
    Unavailable(String),
}

impl StorageError {
    /// Wrap an I/O error raised by `op` on `name`, keeping "not found"
    /// distinguishable.
    pub fn io(op: &'static str, name: impl Into<String>, source: io::Error) -> Self {
        let name = name.into();
        if source.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound(name)
        } else {
            StorageError::Io { op, name, source }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_default() {
        let config = StorageConfig::default();
        assert_eq!(config.buffer_size, 65536);
        assert!(!config.sync_writes);
    }

    #[test]
    fn test_io_errors_keep_not_found() {
        let err = StorageError::io("open", "_0.voc", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, StorageError::NotFound(ref name) if name == "_0.voc"));
        assert_eq!(err.to_string(), "file not found: _0.voc");

        let err = StorageError::io(
            "rename",
            "barrels.tmp",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "cannot rename barrels.tmp: denied");

        let converted: BarrelError = err.into();
        assert!(matches!(converted, BarrelError::Storage(StorageError::Io { .. })));
    }

    #[test]
    fn test_range_check() {
        assert!(check_range(0, 4, 4).is_ok());
        assert!(check_range(1, 4, 4).unwrap_err().is_corruption());
        assert!(check_range(u64::MAX, 1, 4).unwrap_err().is_corruption());
    }
}
