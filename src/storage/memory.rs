//! In-memory storage for tests and transient indexes.

use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::storage::traits::{Storage, StorageError, StorageInput, StorageOutput, check_range};

type Files = Arc<Mutex<BTreeMap<String, Arc<[u8]>>>>;

/// Files held as shared byte slices.
///
/// A file becomes visible when its output is closed or dropped. Inputs
/// share the published bytes, so an open input keeps reading a file after
/// it has been deleted or replaced.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: Files,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }

    /// Sum of all file sizes.
    pub fn total_size(&self) -> u64 {
        self.files.lock().values().map(|data| data.len() as u64).sum()
    }

    /// Overwrite a file's bytes directly. Used to simulate damaged files.
    pub fn put_file(&self, name: &str, data: Vec<u8>) {
        self.files.lock().insert(name.to_string(), data.into());
    }

    /// Copy a file's bytes out of storage.
    pub fn file_bytes(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().get(name).map(|data| data.to_vec())
    }

    fn data(&self, name: &str) -> Result<Arc<[u8]>> {
        let files = self.files.lock();
        let data = files
            .get(name)
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        Ok(Arc::clone(data))
    }
}

impl Storage for MemoryStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        Ok(Box::new(MemoryInput {
            cursor: Cursor::new(self.data(name)?),
        }))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        Ok(Box::new(MemoryOutput {
            name: name.to_string(),
            buffer: Some(Vec::new()),
            files: Arc::clone(&self.files),
            position: 0,
        }))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.files.lock().remove(name);
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        Ok(self.files.lock().keys().cloned().collect())
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        Ok(self.data(name)?.len() as u64)
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        let mut files = self.files.lock();
        let data = files
            .remove(old_name)
            .ok_or_else(|| StorageError::NotFound(old_name.to_string()))?;
        files.insert(new_name.to_string(), data);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// Reader over a published file's bytes.
#[derive(Debug)]
pub struct MemoryInput {
    cursor: Cursor<Arc<[u8]>>,
}

impl Read for MemoryInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Seek for MemoryInput {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl StorageInput for MemoryInput {
    fn size(&self) -> Result<u64> {
        Ok(self.cursor.get_ref().len() as u64)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let data = self.cursor.get_ref();
        check_range(offset, buf.len(), data.len() as u64)?;
        let start = offset as usize;
        buf.copy_from_slice(&data[start..start + buf.len()]);
        Ok(())
    }
}

/// Writer that publishes its buffer into the storage on close.
#[derive(Debug)]
pub struct MemoryOutput {
    name: String,
    buffer: Option<Vec<u8>>,
    files: Files,
    position: u64,
}

impl Write for MemoryOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let Some(buffer) = self.buffer.as_mut() else {
            return Err(io::Error::other(format!("{} is already closed", self.name)));
        };
        buffer.extend_from_slice(buf);
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl StorageOutput for MemoryOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn close(&mut self) -> Result<()> {
        if let Some(buffer) = self.buffer.take() {
            self.files.lock().insert(self.name.clone(), buffer.into());
        }
        Ok(())
    }
}

impl Drop for MemoryOutput {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_is_published_on_close() {
        let storage = MemoryStorage::new();

        let mut output = storage.create_output("_0.dfp").unwrap();
        output.write_all(b"hello barrels").unwrap();
        assert_eq!(output.position(), 13);
        assert!(!storage.file_exists("_0.dfp"));
        output.close().unwrap();
        assert!(output.write_all(b"!").is_err());

        assert_eq!(storage.file_size("_0.dfp").unwrap(), 13);
        let mut input = storage.open_input("_0.dfp").unwrap();
        let mut buf = [0u8; 7];
        input.read_at(6, &mut buf).unwrap();
        assert_eq!(&buf, b"barrels");
    }

    #[test]
    fn test_read_past_end_is_corruption() {
        let storage = MemoryStorage::new();
        storage.put_file("short", vec![1, 2, 3]);

        let mut input = storage.open_input("short").unwrap();
        let mut buf = [0u8; 4];
        assert!(input.read_at(0, &mut buf).unwrap_err().is_corruption());
    }

    #[test]
    fn test_input_outlives_delete() {
        let storage = MemoryStorage::new();
        storage.put_file("_2.pop", vec![7; 8]);
        let mut input = storage.open_input("_2.pop").unwrap();

        storage.delete_file("_2.pop").unwrap();
        storage.delete_file("_2.pop").unwrap();
        assert!(storage.open_input("_2.pop").unwrap_err().is_not_found());

        let mut buf = [0u8; 2];
        input.read_at(6, &mut buf).unwrap();
        assert_eq!(buf, [7, 7]);
    }

    #[test]
    fn test_rename_and_listing() {
        let storage = MemoryStorage::new();
        storage.put_file("b", vec![1]);
        storage.put_file("a.tmp", vec![9; 10]);

        storage.rename_file("a.tmp", "a").unwrap();
        assert!(!storage.file_exists("a.tmp"));
        assert_eq!(storage.list_files().unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert!(storage.rename_file("a.tmp", "c").unwrap_err().is_not_found());
    }

    #[test]
    fn test_dropped_output_is_published() {
        let storage = MemoryStorage::new();
        {
            let mut output = storage.create_output("dropped").unwrap();
            output.write_all(&[1, 2]).unwrap();
        }
        assert_eq!(storage.file_bytes("dropped"), Some(vec![1, 2]));
        assert_eq!(storage.total_size(), 2);
        assert_eq!(storage.file_count(), 1);
    }
}
