//! Storage over one directory of the local file system.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{BarrelError, Result};
use crate::storage::traits::{
    Storage, StorageConfig, StorageError, StorageInput, StorageOutput, check_range,
};

/// Barrel files stored flat in one directory.
#[derive(Debug)]
pub struct FileStorage {
    directory: PathBuf,
    config: StorageConfig,
}

impl FileStorage {
    /// Open `directory`, creating it if needed.
    pub fn new<P: AsRef<Path>>(directory: P, config: StorageConfig) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        let display = directory.display().to_string();
        fs::create_dir_all(&directory)
            .map_err(|e| StorageError::io("create directory", display.as_str(), e))?;
        if !directory.is_dir() {
            return Err(BarrelError::invalid_argument(format!(
                "{display} is not a directory"
            )));
        }
        Ok(FileStorage { directory, config })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path(&self, name: &str) -> PathBuf {
        self.directory.join(name)
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> Result<()> {
        File::open(&self.directory)
            .and_then(|dir| dir.sync_all())
            .map_err(|e| StorageError::io("sync", self.directory.display().to_string(), e))?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> Result<()> {
        Ok(())
    }
}

impl Storage for FileStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let file = File::open(self.path(name)).map_err(|e| StorageError::io("open", name, e))?;
        let size = file
            .metadata()
            .map_err(|e| StorageError::io("stat", name, e))?
            .len();
        Ok(Box::new(FileInput {
            reader: BufReader::with_capacity(self.config.buffer_size, file),
            size,
            pos: 0,
        }))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.path(name))
            .map_err(|e| StorageError::io("create", name, e))?;
        Ok(Box::new(FileOutput {
            name: name.to_string(),
            writer: Some(BufWriter::with_capacity(self.config.buffer_size, file)),
            sync_on_close: self.config.sync_writes,
            position: 0,
        }))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.path(name)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                Err(StorageError::io("delete", name, e).into())
            }
            _ => Ok(()),
        }
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let display = self.directory.display().to_string();
        let entries = fs::read_dir(&self.directory)
            .map_err(|e| StorageError::io("list", display.as_str(), e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io("list", display.as_str(), e))?;
            let is_file = entry.file_type().is_ok_and(|kind| kind.is_file());
            let file_name = entry.file_name();
            if is_file && let Some(name) = file_name.to_str() {
                files.push(name.to_string());
            }
        }
        files.sort();
        Ok(files)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        let metadata = fs::metadata(self.path(name)).map_err(|e| StorageError::io("stat", name, e))?;
        Ok(metadata.len())
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        fs::rename(self.path(old_name), self.path(new_name))
            .map_err(|e| StorageError::io("rename", old_name, e))?;
        if self.config.sync_writes {
            self.sync_directory()?;
        }
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.sync_directory()
    }
}

/// Buffered reader of one file.
///
/// Posting reads walk a file mostly forward in small steps, so a read that
/// lands inside the current buffer moves within it instead of discarding it.
#[derive(Debug)]
pub struct FileInput {
    reader: BufReader<File>,
    size: u64,
    pos: u64,
}

impl Read for FileInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for FileInput {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = self.reader.seek(pos)?;
        Ok(self.pos)
    }
}

impl StorageInput for FileInput {
    fn size(&self) -> Result<u64> {
        Ok(self.size)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.size)?;
        if offset != self.pos {
            self.reader.seek_relative(offset as i64 - self.pos as i64)?;
            self.pos = offset;
        }
        if let Err(e) = self.reader.read_exact(buf) {
            self.pos = self.reader.stream_position()?;
            return Err(BarrelError::from_truncated(e, "read"));
        }
        self.pos += buf.len() as u64;
        Ok(())
    }
}

/// Buffered writer of one file.
#[derive(Debug)]
pub struct FileOutput {
    name: String,
    writer: Option<BufWriter<File>>,
    sync_on_close: bool,
    position: u64,
}

impl FileOutput {
    fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        let name = &self.name;
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::other(format!("{name} is already closed")))
    }
}

impl Write for FileOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.writer()?.write(buf)?;
        self.position += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer()?.flush()
    }
}

impl StorageOutput for FileOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        let writer = self.writer()?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn close(&mut self) -> Result<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let file = writer
            .into_inner()
            .map_err(|e| StorageError::io("write", self.name.as_str(), e.into_error()))?;
        if self.sync_on_close {
            file.sync_all()
                .map_err(|e| StorageError::io("sync", self.name.as_str(), e))?;
        }
        Ok(())
    }
}

impl Drop for FileOutput {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage(dir: &TempDir) -> FileStorage {
        FileStorage::new(dir.path(), StorageConfig::default()).unwrap()
    }

    fn write(storage: &FileStorage, name: &str, bytes: &[u8]) {
        let mut output = storage.create_output(name).unwrap();
        output.write_all(bytes).unwrap();
        assert_eq!(output.position(), bytes.len() as u64);
        output.close().unwrap();
    }

    #[test]
    fn test_positional_reads() {
        let temp_dir = TempDir::new().unwrap();
        let storage = storage(&temp_dir);
        let bytes: Vec<u8> = (0..=255).collect();
        write(&storage, "_0.dfp", &bytes);

        assert!(storage.file_exists("_0.dfp"));
        assert_eq!(storage.file_size("_0.dfp").unwrap(), 256);
        assert_eq!(storage.list_files().unwrap(), vec!["_0.dfp".to_string()]);

        let mut input = storage.open_input("_0.dfp").unwrap();
        let mut buf = [0u8; 4];
        for offset in [100, 10, 200, 12, 252] {
            input.read_at(offset, &mut buf).unwrap();
            assert_eq!(buf[0], offset as u8);
            assert_eq!(buf[3], offset as u8 + 3);
        }
        assert!(input.read_at(253, &mut buf).unwrap_err().is_corruption());
    }

    #[test]
    fn test_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let storage = storage(&temp_dir);

        assert!(storage.open_input("nope").unwrap_err().is_not_found());
        assert!(storage.file_size("nope").unwrap_err().is_not_found());
        storage.delete_file("nope").unwrap();
    }

    #[test]
    fn test_rename_replaces_target() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(
            temp_dir.path(),
            StorageConfig {
                sync_writes: true,
                ..StorageConfig::default()
            },
        )
        .unwrap();
        write(&storage, "barrels", &[1]);
        write(&storage, "barrels.tmp", &[2]);

        storage.rename_file("barrels.tmp", "barrels").unwrap();
        assert_eq!(storage.list_files().unwrap(), vec!["barrels".to_string()]);
        let mut buf = [0u8; 1];
        storage.open_input("barrels").unwrap().read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [2]);
    }

    #[test]
    fn test_write_after_close_fails() {
        let temp_dir = TempDir::new().unwrap();
        let storage = storage(&temp_dir);
        let mut output = storage.create_output("_1.pop").unwrap();
        output.close().unwrap();
        output.close().unwrap();
        assert!(output.write_all(&[1]).is_err());
    }
}
