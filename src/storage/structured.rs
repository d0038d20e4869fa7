//! Structured binary I/O.
//!
//! [`StructWriter`] and [`StructReader`] stream little-endian fixed-width
//! values and varints through storage while keeping a running CRC32 of every
//! byte. The writer appends the checksum as a `u32` trailer on close;
//! metadata readers call [`StructReader::verify_checksum`] after parsing.
//!
//! [`ByteView`] is the bounds-checked cursor used to parse byte ranges that
//! were read in one piece (posting headers, chunk payloads, vocabulary
//! sections). Every access past the end of the view is reported as
//! corruption.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;

use crate::error::{BarrelError, Result};
use crate::storage::{StorageInput, StorageOutput};
use crate::util::varint;

/// Size of the checksum trailer written by [`StructWriter::close`].
pub const CHECKSUM_LEN: u64 = 4;

/// A structured file writer for binary data.
pub struct StructWriter<W: StorageOutput> {
    writer: W,
    hasher: Hasher,
    position: u64,
}

impl<W: StorageOutput> StructWriter<W> {
    /// Create a new structured file writer.
    pub fn new(writer: W) -> Self {
        StructWriter {
            writer,
            hasher: Hasher::new(),
            position: 0,
        }
    }

    /// Write a u8 value.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_raw(&[value])
    }

    /// Write a u32 value (little-endian).
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_raw(&value.to_le_bytes())
    }

    /// Write a u64 value (little-endian).
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_raw(&value.to_le_bytes())
    }

    /// Write a variable-length integer.
    pub fn write_varint(&mut self, value: u64) -> Result<()> {
        let encoded = varint::encode_u64(value);
        self.write_raw(&encoded)
    }

    /// Write a string with length prefix.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_bytes(value.as_bytes())
    }

    /// Write raw bytes with length prefix.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.write_varint(value.len() as u64)?;
        self.write_raw(value)
    }

    /// Write raw bytes without length prefix.
    pub fn write_raw(&mut self, value: &[u8]) -> Result<()> {
        self.writer.write_all(value)?;
        self.hasher.update(value);
        self.position += value.len() as u64;
        Ok(())
    }

    /// Get current file position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Checksum of everything written so far.
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Write the checksum trailer, then flush and close the output.
    pub fn close(mut self) -> Result<()> {
        let checksum = self.checksum();
        self.writer.write_u32::<LittleEndian>(checksum)?;
        self.writer.flush_and_sync()?;
        self.writer.close()?;
        Ok(())
    }
}

/// A structured file reader for binary data.
pub struct StructReader<R: StorageInput> {
    reader: R,
    hasher: Hasher,
    position: u64,
    file_size: u64,
}

impl<R: StorageInput> StructReader<R> {
    /// Create a new structured file reader.
    pub fn new(reader: R) -> Result<Self> {
        let file_size = reader.size()?;
        if file_size < CHECKSUM_LEN {
            return Err(BarrelError::corruption(format!(
                "file of {file_size} bytes is too short for a checksum"
            )));
        }
        Ok(StructReader {
            reader,
            hasher: Hasher::new(),
            position: 0,
            file_size,
        })
    }

    /// Read a u8 value.
    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_into(&mut buf)?;
        Ok(buf[0])
    }

    /// Read a u32 value (little-endian).
    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_into(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Read a u64 value (little-endian).
    pub fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_into(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Read a variable-length integer.
    pub fn read_varint(&mut self) -> Result<u64> {
        let mut bytes = Vec::with_capacity(varint::MAX_VU64_LEN);
        loop {
            let byte = self.read_u8()?;
            bytes.push(byte);
            if byte & 0x80 == 0 || bytes.len() > varint::MAX_VU64_LEN {
                break;
            }
        }

        let (value, _) = varint::decode_u64(&bytes)?;
        Ok(value)
    }

    /// Read a varint that must fit in a u32.
    pub fn read_varint_u32(&mut self) -> Result<u32> {
        let value = self.read_varint()?;
        u32::try_from(value).map_err(|_| BarrelError::corruption("varint overflows u32"))
    }

    /// Read a string with length prefix.
    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes)
            .map_err(|e| BarrelError::corruption(format!("Invalid UTF-8: {e}")))
    }

    /// Read bytes with length prefix.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let length = self.read_varint()?;
        self.read_raw(length as usize)
    }

    /// Read exact number of raw bytes.
    pub fn read_raw(&mut self, length: usize) -> Result<Vec<u8>> {
        if self.position + length as u64 > self.file_size.saturating_sub(CHECKSUM_LEN) {
            return Err(BarrelError::corruption(format!(
                "read of {length} bytes at {} runs into the checksum trailer",
                self.position
            )));
        }
        let mut bytes = vec![0u8; length];
        self.read_into(&mut bytes)?;
        Ok(bytes)
    }

    fn read_into(&mut self, buf: &mut [u8]) -> Result<()> {
        self.reader
            .read_exact(buf)
            .map_err(|e| BarrelError::from_truncated(e, "structured file"))?;
        self.hasher.update(buf);
        self.position += buf.len() as u64;
        Ok(())
    }

    /// Get current file position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Get file size, including the checksum trailer.
    pub fn size(&self) -> u64 {
        self.file_size
    }

    /// Number of payload bytes between the cursor and the trailer.
    pub fn remaining(&self) -> u64 {
        self.file_size
            .saturating_sub(CHECKSUM_LEN)
            .saturating_sub(self.position)
    }

    /// Verify that the whole payload was consumed and matches the trailer.
    pub fn verify_checksum(mut self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(BarrelError::corruption(format!(
                "{} unread bytes before checksum",
                self.remaining()
            )));
        }

        let stored = self
            .reader
            .read_u32::<LittleEndian>()
            .map_err(|e| BarrelError::from_truncated(e, "checksum"))?;
        let computed = self.hasher.finalize();
        if stored != computed {
            return Err(BarrelError::corruption(format!(
                "checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"
            )));
        }
        Ok(())
    }
}

/// A bounds-checked read cursor over a byte slice.
#[derive(Debug, Clone)]
pub struct ByteView<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ByteView<'a> {
    /// Create a view positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        ByteView { data, offset: 0 }
    }

    /// Current offset from the start of the view.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Total length of the view.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes left after the cursor.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Move the cursor to an absolute offset within the view.
    pub fn seek(&mut self, offset: usize) -> Result<()> {
        if offset > self.data.len() {
            return Err(BarrelError::corruption(format!(
                "seek to {offset} beyond view of {} bytes",
                self.data.len()
            )));
        }
        self.offset = offset;
        Ok(())
    }

    /// Read a varint.
    pub fn read_vu64(&mut self) -> Result<u64> {
        let (value, read) = varint::decode_u64(&self.data[self.offset..])?;
        self.offset += read;
        Ok(value)
    }

    /// Read a varint that must fit in a u32.
    pub fn read_vu32(&mut self) -> Result<u32> {
        let (value, read) = varint::decode_u32(&self.data[self.offset..])?;
        self.offset += read;
        Ok(value)
    }

    /// Read a little-endian u32.
    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a little-endian u64.
    pub fn read_u64(&mut self) -> Result<u64> {
        let mut bytes = self.take(8)?;
        Ok(bytes.read_u64::<LittleEndian>()?)
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_vu64()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| BarrelError::corruption(format!("Invalid UTF-8: {e}")))
    }

    /// Borrow the next `len` bytes and advance past them.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(BarrelError::corruption(format!(
                "need {len} bytes at offset {}, only {} left",
                self.offset,
                self.remaining()
            )));
        }
        let slice = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, Storage};

    #[test]
    fn test_write_read_verify() {
        let storage = MemoryStorage::new();

        let output = storage.create_output("meta").unwrap();
        let mut writer = StructWriter::new(output);
        writer.write_u32(0xDEADBEEF).unwrap();
        writer.write_varint(300).unwrap();
        writer.write_string("_3").unwrap();
        writer.write_u64(1 << 40).unwrap();
        writer.write_u8(1).unwrap();
        assert_eq!(writer.position(), 4 + 2 + 3 + 8 + 1);
        writer.close().unwrap();

        let input = storage.open_input("meta").unwrap();
        let mut reader = StructReader::new(input).unwrap();
        assert_eq!(reader.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(reader.read_varint().unwrap(), 300);
        assert_eq!(reader.read_string().unwrap(), "_3");
        assert_eq!(reader.read_u64().unwrap(), 1 << 40);
        assert_eq!(reader.read_u8().unwrap(), 1);
        reader.verify_checksum().unwrap();
    }

    #[test]
    fn test_checksum_detects_flipped_byte() {
        let storage = MemoryStorage::new();

        let output = storage.create_output("meta").unwrap();
        let mut writer = StructWriter::new(output);
        writer.write_u64(42).unwrap();
        writer.close().unwrap();

        let mut bytes = storage.file_bytes("meta").unwrap();
        bytes[0] ^= 0xFF;
        storage.put_file("meta", bytes);

        let input = storage.open_input("meta").unwrap();
        let mut reader = StructReader::new(input).unwrap();
        reader.read_u64().unwrap();
        assert!(reader.verify_checksum().unwrap_err().is_corruption());
    }

    #[test]
    fn test_read_into_trailer_is_corruption() {
        let storage = MemoryStorage::new();
        let output = storage.create_output("meta").unwrap();
        let mut writer = StructWriter::new(output);
        writer.write_bytes(&[1, 2, 3]).unwrap();
        writer.close().unwrap();

        let input = storage.open_input("meta").unwrap();
        let mut reader = StructReader::new(input).unwrap();
        assert_eq!(reader.read_bytes().unwrap(), vec![1, 2, 3]);
        assert!(reader.read_raw(4).unwrap_err().is_corruption());
    }

    #[test]
    fn test_byte_view_bounds() {
        let mut data = Vec::new();
        varint::put_u32(&mut data, 129);
        data.extend_from_slice(&7u32.to_le_bytes());
        data.push(2);
        data.extend_from_slice(b"ab");

        let mut view = ByteView::new(&data);
        assert_eq!(view.read_vu32().unwrap(), 129);
        assert_eq!(view.read_u32().unwrap(), 7);
        assert_eq!(view.read_string().unwrap(), "ab");
        assert_eq!(view.remaining(), 0);
        assert!(view.read_u8().unwrap_err().is_corruption());
        assert!(view.seek(data.len() + 1).is_err());
    }
}
