//! Writes the files of one barrel.

use std::sync::Arc;

use crate::barrel::field::{FieldInfo, FieldsInfo};
use crate::barrel::vocabulary::VocabularyWriter;
use crate::barrel::{barrel_files, positions_file, postings_file, vocabulary_file};
use crate::config::PostingConfig;
use crate::error::{BarrelError, Result};
use crate::posting::{PostingEncoder, TermInfo};
use crate::storage::{Storage, StorageOutput};

struct OpenField {
    info: FieldInfo,
    vocabulary: VocabularyWriter,
    encoder: PostingEncoder,
    dfp_start: u64,
    pop_start: u64,
}

/// Streams fields and terms into a new barrel.
///
/// Fields are written one after another; within a field, terms must arrive
/// in ascending order. The barrel becomes readable once
/// [`BarrelWriter::finish`] has written its field table. Dropping a writer
/// without finishing leaves partial files behind; call
/// [`BarrelWriter::abort`] to remove them.
pub struct BarrelWriter {
    storage: Arc<dyn Storage>,
    name: String,
    config: PostingConfig,
    ring_capacity: usize,
    voc: Box<dyn StorageOutput>,
    dfp: Box<dyn StorageOutput>,
    pop: Box<dyn StorageOutput>,
    fields: FieldsInfo,
    current: Option<OpenField>,
}

impl std::fmt::Debug for BarrelWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BarrelWriter")
            .field("name", &self.name)
            .field("fields", &self.fields.len())
            .finish()
    }
}

impl BarrelWriter {
    pub fn create(
        storage: Arc<dyn Storage>,
        name: &str,
        config: &PostingConfig,
        ring_capacity: usize,
    ) -> Result<Self> {
        let voc = storage.create_output(&vocabulary_file(name))?;
        let dfp = storage.create_output(&postings_file(name))?;
        let pop = storage.create_output(&positions_file(name))?;
        Ok(BarrelWriter {
            storage,
            name: name.to_string(),
            config: config.clone(),
            ring_capacity,
            voc,
            dfp,
            pop,
            fields: FieldsInfo::new(),
            current: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Begin a field. The previous field, if any, is finished first.
    pub fn start_field(&mut self, mut info: FieldInfo) -> Result<()> {
        self.finish_field()?;
        if self.fields.get(info.id).is_some() || self.fields.get_by_name(&info.name).is_some() {
            return Err(BarrelError::invalid_argument(format!(
                "field {} written twice to barrel {}",
                info.name, self.name
            )));
        }
        info.reset();
        let encoder = PostingEncoder::new(&self.config, info.codec, info.has_positions());
        self.current = Some(OpenField {
            vocabulary: VocabularyWriter::new(self.voc.as_ref(), self.ring_capacity),
            encoder,
            dfp_start: self.dfp.position(),
            pop_start: self.pop.position(),
            info,
        });
        Ok(())
    }

    /// Write one term of the current field. `feed` pushes the term's
    /// documents into the encoder. Terms that end up with no document are
    /// left out of the vocabulary and `None` is returned.
    pub fn write_term<F>(&mut self, term: &str, feed: F) -> Result<Option<TermInfo>>
    where
        F: FnOnce(&mut PostingEncoder) -> Result<()>,
    {
        let field = self
            .current
            .as_mut()
            .ok_or_else(|| BarrelError::index("no field started"))?;
        field.encoder.reset();
        feed(&mut field.encoder)?;
        let Some(info) = field
            .encoder
            .finish(self.dfp.as_mut(), self.pop.as_mut())?
        else {
            return Ok(None);
        };
        field.vocabulary.add(self.voc.as_mut(), term, info)?;
        Ok(Some(info))
    }

    /// Finish the current field, if one is open.
    pub fn finish_field(&mut self) -> Result<()> {
        let Some(field) = self.current.take() else {
            return Ok(());
        };
        let section = field.vocabulary.finish(self.voc.as_mut())?;
        let mut info = field.info;
        info.vocabulary_offset = section.offset;
        info.vocabulary_length = section.length;
        info.term_count = section.term_count;
        info.dfp_length = self.dfp.position() - field.dfp_start;
        info.pop_length = self.pop.position() - field.pop_start;
        log::debug!(
            "barrel {}: field {} written with {} terms",
            self.name,
            info.name,
            info.term_count
        );
        self.fields.add_field(info)
    }

    /// Close the data files and write the field table.
    pub fn finish(mut self) -> Result<FieldsInfo> {
        self.finish_field()?;
        for output in [&mut self.voc, &mut self.dfp, &mut self.pop] {
            output.flush_and_sync()?;
            output.close()?;
        }
        self.fields.write(self.storage.as_ref(), &self.name)?;
        Ok(self.fields)
    }

    /// Drop the outputs and delete whatever was written.
    pub fn abort(self) {
        let BarrelWriter {
            storage, name, voc, dfp, pop, ..
        } = self;
        drop((voc, dfp, pop));
        remove_barrel_files(storage.as_ref(), &name);
    }
}

/// Best-effort removal of every file of `barrel`.
pub fn remove_barrel_files(storage: &dyn Storage, barrel: &str) {
    for file in barrel_files(barrel) {
        if let Err(e) = storage.delete_file(&file) {
            log::warn!("failed to delete {file}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrel::field::flags;
    use crate::config::Codec;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_write_two_fields() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut writer =
            BarrelWriter::create(Arc::clone(&storage), "_0", &PostingConfig::default(), 4).unwrap();

        writer
            .start_field(FieldInfo::new(0, "title", flags::INDEXED | flags::POSITIONS, Codec::BitPacked))
            .unwrap();
        let info = writer
            .write_term("rust", |e| {
                e.push(1, 2, &[0, 3])?;
                e.push(4, 1, &[1])
            })
            .unwrap()
            .unwrap();
        assert_eq!((info.doc_freq, info.ctf), (2, 3));
        assert!(writer.write_term("skip", |_| Ok(())).unwrap().is_none());

        writer
            .start_field(FieldInfo::new(1, "body", flags::INDEXED, Codec::VByte))
            .unwrap();
        writer.write_term("a", |e| e.push(2, 5, &[])).unwrap();
        let fields = writer.finish().unwrap();

        let title = fields.get_by_name("title").unwrap();
        assert_eq!(title.term_count, 1);
        assert!(title.pop_length > 0);
        let body = fields.get_by_name("body").unwrap();
        assert_eq!(body.term_count, 1);
        assert_eq!(body.pop_length, 0);
        assert_eq!(
            body.vocabulary_offset,
            title.vocabulary_offset + title.vocabulary_length
        );

        let reread = FieldsInfo::read(storage.as_ref(), "_0").unwrap();
        assert_eq!(reread.get_by_name("body"), Some(body));
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut writer =
            BarrelWriter::create(Arc::clone(&storage), "_0", &PostingConfig::default(), 4).unwrap();
        writer
            .start_field(FieldInfo::new(0, "title", flags::INDEXED, Codec::VByte))
            .unwrap();
        assert!(
            writer
                .start_field(FieldInfo::new(1, "title", flags::INDEXED, Codec::VByte))
                .is_err()
        );
    }

    #[test]
    fn test_abort_removes_files() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let writer =
            BarrelWriter::create(Arc::clone(&storage), "_3", &PostingConfig::default(), 4).unwrap();
        writer.abort();
        assert!(storage.list_files().unwrap().is_empty());
    }
}
