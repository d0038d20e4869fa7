//! Per-barrel field table.
//!
//! Each barrel carries a dense table of the fields it indexes. The lengths
//! and offsets are filled in while the barrel is written and are meaningful
//! only once it is flushed. The table is stored in `<barrel>.fdi` and is
//! always read and written as one block.

use std::io::Read;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::config::Codec;
use crate::error::{BarrelError, Result};
use crate::storage::{ByteView, CHECKSUM_LEN, Storage, StructWriter};
use crate::types::FieldId;

/// Magic number of a field table ("FDIX").
const FIELDS_MAGIC: u32 = 0x4644_4958;

/// Field flag bits.
pub mod flags {
    /// Terms of the field are indexed.
    pub const INDEXED: u8 = 0b0000_0001;
    /// Positions are stored for the field.
    pub const POSITIONS: u8 = 0b0000_0010;
    /// A forward index is kept for the field.
    pub const FORWARD: u8 = 0b0000_0100;
}

/// File name of a barrel's field table.
pub fn fields_file(barrel: &str) -> String {
    format!("{barrel}.fdi")
}

/// Metadata of one field within one barrel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub id: FieldId,
    pub name: String,
    pub flags: u8,
    pub codec: Codec,

    /// Start of the field's section in the vocabulary file.
    pub vocabulary_offset: u64,

    /// Number of distinct terms.
    pub term_count: u64,

    /// Bytes of the vocabulary section, footer included.
    pub vocabulary_length: u64,

    /// Bytes written to the doc/frequency stream.
    pub dfp_length: u64,

    /// Bytes written to the position stream.
    pub pop_length: u64,
}

impl FieldInfo {
    /// Create a field with zeroed counters.
    pub fn new(id: FieldId, name: impl Into<String>, flags: u8, codec: Codec) -> Self {
        FieldInfo {
            id,
            name: name.into(),
            flags,
            codec,
            vocabulary_offset: 0,
            term_count: 0,
            vocabulary_length: 0,
            dfp_length: 0,
            pop_length: 0,
        }
    }

    pub fn is_indexed(&self) -> bool {
        self.flags & flags::INDEXED != 0
    }

    pub fn has_positions(&self) -> bool {
        self.flags & flags::POSITIONS != 0
    }

    pub fn is_forward(&self) -> bool {
        self.flags & flags::FORWARD != 0
    }

    /// Reset the per-barrel counters, keeping identity and flags.
    pub fn reset(&mut self) {
        self.vocabulary_offset = 0;
        self.term_count = 0;
        self.vocabulary_length = 0;
        self.dfp_length = 0;
        self.pop_length = 0;
    }
}

/// Dense table of fields, addressable by id and by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldsInfo {
    fields: Vec<Option<FieldInfo>>,
    by_name: AHashMap<String, FieldId>,
}

impl FieldsInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field.
    pub fn add_field(&mut self, field: FieldInfo) -> Result<()> {
        if let Some(&existing) = self.by_name.get(&field.name)
            && existing != field.id
        {
            return Err(BarrelError::invalid_argument(format!(
                "field {} is registered with id {existing}, not {}",
                field.name, field.id
            )));
        }

        let idx = field.id as usize;
        if idx >= self.fields.len() {
            self.fields.resize(idx + 1, None);
        }
        if let Some(old) = &self.fields[idx]
            && old.name != field.name
        {
            self.by_name.remove(&old.name);
        }
        self.by_name.insert(field.name.clone(), field.id);
        self.fields[idx] = Some(field);
        Ok(())
    }

    pub fn get(&self, id: FieldId) -> Option<&FieldInfo> {
        self.fields.get(id as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: FieldId) -> Option<&mut FieldInfo> {
        self.fields.get_mut(id as usize).and_then(Option::as_mut)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&FieldInfo> {
        self.by_name.get(name).and_then(|&id| self.get(id))
    }

    /// Id of the named field.
    pub fn field_id(&self, name: &str) -> Option<FieldId> {
        self.by_name.get(name).copied()
    }

    /// Iterate fields in id order.
    pub fn iter(&self) -> impl Iterator<Item = &FieldInfo> {
        self.fields.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Write the table to `<barrel>.fdi`.
    pub fn write(&self, storage: &dyn Storage, barrel: &str) -> Result<()> {
        let output = storage.create_output(&fields_file(barrel))?;
        let mut writer = StructWriter::new(output);

        writer.write_u32(FIELDS_MAGIC)?;
        writer.write_varint(self.len() as u64)?;
        for field in self.iter() {
            writer.write_varint(field.id as u64)?;
            writer.write_string(&field.name)?;
            writer.write_u8(field.flags)?;
            writer.write_u8(field.codec.tag())?;
            writer.write_u64(field.vocabulary_offset)?;
            writer.write_u64(field.term_count)?;
            writer.write_u64(field.vocabulary_length)?;
            writer.write_u64(field.dfp_length)?;
            writer.write_u64(field.pop_length)?;
        }
        writer.close()
    }

    /// Read the table of `barrel` in a single read.
    pub fn read(storage: &dyn Storage, barrel: &str) -> Result<Self> {
        let name = fields_file(barrel);
        let mut input = storage.open_input(&name)?;
        let size = input.size()? as usize;
        let mut data = Vec::with_capacity(size);
        input
            .read_to_end(&mut data)
            .map_err(|e| BarrelError::from_truncated(e, "field table"))?;

        if data.len() < CHECKSUM_LEN as usize {
            return Err(BarrelError::corruption(format!("{name} is truncated")));
        }
        let (payload, trailer) = data.split_at(data.len() - CHECKSUM_LEN as usize);
        let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let computed = crc32fast::hash(payload);
        if stored != computed {
            return Err(BarrelError::corruption(format!(
                "{name}: checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"
            )));
        }

        let mut view = ByteView::new(payload);
        let magic = view.read_u32()?;
        if magic != FIELDS_MAGIC {
            return Err(BarrelError::corruption(format!(
                "{name}: invalid magic {magic:#x}"
            )));
        }

        let count = view.read_vu64()?;
        let mut fields = FieldsInfo::new();
        for _ in 0..count {
            let id = view.read_vu32()?;
            let field_name = view.read_string()?;
            let flags = view.read_u8()?;
            let codec = Codec::from_tag(view.read_u8()?)?;
            let mut field = FieldInfo::new(id, field_name, flags, codec);
            field.vocabulary_offset = view.read_u64()?;
            field.term_count = view.read_u64()?;
            field.vocabulary_length = view.read_u64()?;
            field.dfp_length = view.read_u64()?;
            field.pop_length = view.read_u64()?;
            fields
                .add_field(field)
                .map_err(|e| BarrelError::corruption(format!("{name}: {e}")))?;
        }
        if view.remaining() != 0 {
            return Err(BarrelError::corruption(format!(
                "{name}: {} trailing bytes",
                view.remaining()
            )));
        }
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn sample() -> FieldsInfo {
        let mut fields = FieldsInfo::new();
        let mut title = FieldInfo::new(0, "title", flags::INDEXED | flags::POSITIONS, Codec::BitPacked);
        title.vocabulary_offset = 0;
        title.term_count = 12;
        title.vocabulary_length = 340;
        title.dfp_length = 1024;
        title.pop_length = 77;
        fields.add_field(title).unwrap();

        let mut body = FieldInfo::new(3, "body", flags::INDEXED, Codec::VByte);
        body.vocabulary_offset = 340;
        body.term_count = 5;
        fields.add_field(body).unwrap();
        fields
    }

    #[test]
    fn test_lookup() {
        let fields = sample();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields.field_id("body"), Some(3));
        assert!(fields.get(1).is_none());
        assert!(fields.get(42).is_none());
        assert!(fields.get_by_name("title").unwrap().has_positions());
        assert!(!fields.get_by_name("body").unwrap().has_positions());

        let ids: Vec<FieldId> = fields.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![0, 3]);
    }

    #[test]
    fn test_conflicting_name() {
        let mut fields = sample();
        let clash = FieldInfo::new(7, "title", flags::INDEXED, Codec::VByte);
        assert!(fields.add_field(clash).is_err());
    }

    #[test]
    fn test_write_and_read() {
        let storage = MemoryStorage::new();
        let fields = sample();
        fields.write(&storage, "_4").unwrap();
        assert!(storage.file_exists("_4.fdi"));

        let loaded = FieldsInfo::read(&storage, "_4").unwrap();
        assert_eq!(loaded, fields);
    }

    #[test]
    fn test_corrupt_table() {
        let storage = MemoryStorage::new();
        sample().write(&storage, "_0").unwrap();

        let mut bytes = storage.file_bytes("_0.fdi").unwrap();
        bytes[6] ^= 0x40;
        storage.put_file("_0.fdi", bytes.clone());
        assert!(FieldsInfo::read(&storage, "_0").unwrap_err().is_corruption());

        storage.put_file("_0.fdi", bytes[..3].to_vec());
        assert!(FieldsInfo::read(&storage, "_0").unwrap_err().is_corruption());
    }
}
