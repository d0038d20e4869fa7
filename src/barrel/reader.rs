//! Read access to a flushed barrel.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::barrel::field::{FieldInfo, FieldsInfo};
use crate::barrel::term::{TermIterator, TermReader};
use crate::barrel::vocabulary::Vocabulary;
use crate::barrel::{positions_file, postings_file, vocabulary_file};
use crate::bitset::Bitset;
use crate::cache::ListingCache;
use crate::config::{Codec, ListingCacheConfig};
use crate::error::{BarrelError, Result};
use crate::posting::{DiskPostingReader, PostingFile, PostingReader, TermInfo};
use crate::storage::Storage;
use crate::types::FieldId;

/// Listing caches of one barrel, one per posting file.
#[derive(Debug, Clone)]
pub struct BarrelCaches {
    pub postings: Arc<ListingCache>,
    pub positions: Arc<ListingCache>,
}

impl BarrelCaches {
    pub fn from_config(config: &ListingCacheConfig) -> Self {
        BarrelCaches {
            postings: Arc::new(ListingCache::from_config(config)),
            positions: Arc::new(ListingCache::from_config(config)),
        }
    }
}

/// An opened, flushed barrel.
///
/// Field vocabularies are loaded on first use and kept for the lifetime of
/// the reader.
#[derive(Debug)]
pub struct BarrelReader {
    name: String,
    storage: Arc<dyn Storage>,
    fields: FieldsInfo,
    dfp: Arc<PostingFile>,
    pop: Arc<PostingFile>,
    vocabularies: Mutex<AHashMap<FieldId, Arc<Vocabulary>>>,
}

impl BarrelReader {
    pub fn open(storage: Arc<dyn Storage>, name: &str, caches: Option<&BarrelCaches>) -> Result<Self> {
        let fields = FieldsInfo::read(storage.as_ref(), name)?;
        let dfp = PostingFile::open(
            storage.as_ref(),
            &postings_file(name),
            caches.map(|c| Arc::clone(&c.postings)),
        )?;
        let pop = PostingFile::open(
            storage.as_ref(),
            &positions_file(name),
            caches.map(|c| Arc::clone(&c.positions)),
        )?;
        Ok(BarrelReader {
            name: name.to_string(),
            storage,
            fields,
            dfp: Arc::new(dfp),
            pop: Arc::new(pop),
            vocabularies: Mutex::new(AHashMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &FieldsInfo {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.get_by_name(name)
    }

    /// Vocabulary of a field, loading it on first access.
    pub fn vocabulary(&self, field: &FieldInfo) -> Result<Arc<Vocabulary>> {
        if let Some(vocabulary) = self.vocabularies.lock().get(&field.id) {
            return Ok(Arc::clone(vocabulary));
        }

        let name = vocabulary_file(&self.name);
        let mut input = self.storage.open_input(&name)?;
        let mut section = vec![0u8; field.vocabulary_length as usize];
        input.read_at(field.vocabulary_offset, &mut section)?;
        let vocabulary = Arc::new(Vocabulary::parse(&section).map_err(|e| match e {
            BarrelError::Corruption(msg) => {
                BarrelError::corruption(format!("{name}, field {}: {msg}", field.name))
            }
            other => other,
        })?);
        if vocabulary.len() as u64 != field.term_count {
            return Err(BarrelError::corruption(format!(
                "{name}: field {} has {} terms, its table records {}",
                field.name,
                vocabulary.len(),
                field.term_count
            )));
        }

        self.vocabularies
            .lock()
            .insert(field.id, Arc::clone(&vocabulary));
        Ok(vocabulary)
    }

    fn source(&self, field_name: &str) -> Result<Option<FieldSource>> {
        let Some(field) = self.field(field_name) else {
            return Ok(None);
        };
        Ok(Some(FieldSource {
            codec: field.codec,
            vocabulary: self.vocabulary(field)?,
            dfp: Arc::clone(&self.dfp),
            pop: field.has_positions().then(|| Arc::clone(&self.pop)),
        }))
    }

    /// Point lookups in a field. `None` if the barrel has no such field.
    pub fn term_reader(
        &self,
        field: &str,
        deleted: Option<Arc<Bitset>>,
    ) -> Result<Option<DiskTermReader>> {
        Ok(self.source(field)?.map(|source| DiskTermReader {
            source,
            deleted,
            current: None,
        }))
    }

    /// Ordered walk over a field's terms. `None` if the barrel has no such
    /// field.
    pub fn term_iterator(
        &self,
        field: &str,
        deleted: Option<Arc<Bitset>>,
    ) -> Result<Option<DiskTermIterator>> {
        Ok(self.source(field)?.map(|source| DiskTermIterator {
            source,
            deleted,
            next: 0,
            current: None,
        }))
    }
}

#[derive(Debug, Clone)]
struct FieldSource {
    codec: Codec,
    vocabulary: Arc<Vocabulary>,
    dfp: Arc<PostingFile>,
    pop: Option<Arc<PostingFile>>,
}

impl FieldSource {
    fn open(&self, info: &TermInfo, deleted: Option<&Arc<Bitset>>) -> Result<DiskPostingReader> {
        let reader = DiskPostingReader::open(
            Arc::clone(&self.dfp),
            self.pop.clone(),
            self.codec,
            info,
        )?;
        Ok(reader.with_deleted(deleted.cloned()))
    }
}

/// [`TermReader`] over a flushed barrel.
#[derive(Debug)]
pub struct DiskTermReader {
    source: FieldSource,
    deleted: Option<Arc<Bitset>>,
    current: Option<usize>,
}

impl TermReader for DiskTermReader {
    fn seek(&mut self, term: &str) -> Result<bool> {
        self.current = self.source.vocabulary.search(term).ok();
        Ok(self.current.is_some())
    }

    fn term_info(&self) -> Option<TermInfo> {
        self.current
            .and_then(|idx| self.source.vocabulary.info(idx))
            .copied()
    }

    fn postings(&self) -> Result<Option<Box<dyn PostingReader + '_>>> {
        let Some(info) = self.term_info() else {
            return Ok(None);
        };
        let reader = self.source.open(&info, self.deleted.as_ref())?;
        Ok(Some(Box::new(reader)))
    }
}

/// [`TermIterator`] over a flushed barrel.
#[derive(Debug)]
pub struct DiskTermIterator {
    source: FieldSource,
    deleted: Option<Arc<Bitset>>,
    next: usize,
    current: Option<usize>,
}

impl DiskTermIterator {
    /// Codec of the field's postings.
    pub fn codec(&self) -> Codec {
        self.source.codec
    }

    pub fn has_positions(&self) -> bool {
        self.source.pop.is_some()
    }

    /// Number of terms in the field.
    pub fn term_count(&self) -> usize {
        self.source.vocabulary.len()
    }

    /// Posting of the current term without the deletion filter applied.
    pub fn raw_postings(&self) -> Result<Option<DiskPostingReader>> {
        let Some(info) = TermIterator::term_info(self) else {
            return Ok(None);
        };
        self.source.open(&info, None).map(Some)
    }
}

impl TermIterator for DiskTermIterator {
    fn advance(&mut self) -> Result<bool> {
        if self.next < self.source.vocabulary.len() {
            self.current = Some(self.next);
            self.next += 1;
            Ok(true)
        } else {
            self.current = None;
            Ok(false)
        }
    }

    fn term(&self) -> Option<&str> {
        self.current.and_then(|idx| self.source.vocabulary.term(idx))
    }

    fn term_info(&self) -> Option<TermInfo> {
        self.current
            .and_then(|idx| self.source.vocabulary.info(idx))
            .copied()
    }

    fn postings(&self) -> Result<Option<Box<dyn PostingReader + '_>>> {
        let Some(info) = TermIterator::term_info(self) else {
            return Ok(None);
        };
        let reader = self.source.open(&info, self.deleted.as_ref())?;
        Ok(Some(Box::new(reader)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrel::field::flags;
    use crate::barrel::writer::BarrelWriter;
    use crate::config::PostingConfig;
    use crate::posting::collect_positions;
    use crate::storage::MemoryStorage;
    use crate::types::{DocId, Position};

    fn write_barrel(storage: &Arc<dyn Storage>) {
        let config = PostingConfig {
            chunk_size: 2,
            ..PostingConfig::default()
        };
        let mut writer = BarrelWriter::create(Arc::clone(storage), "_0", &config, 2).unwrap();
        writer
            .start_field(FieldInfo::new(
                0,
                "body",
                flags::INDEXED | flags::POSITIONS,
                Codec::BitPacked,
            ))
            .unwrap();
        let terms: [(&str, &[(DocId, &[Position])]); 3] = [
            ("bar", &[(2, &[1])]),
            ("foo", &[(1, &[0, 4]), (2, &[3]), (7, &[2])]),
            ("zed", &[(7, &[0])]),
        ];
        for (term, docs) in terms {
            writer
                .write_term(term, |e| {
                    for &(doc, positions) in docs {
                        e.push(doc, positions.len() as u32, positions)?;
                    }
                    Ok(())
                })
                .unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_term_reader() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        write_barrel(&storage);
        let barrel = BarrelReader::open(Arc::clone(&storage), "_0", None).unwrap();
        assert!(barrel.term_reader("title", None).unwrap().is_none());

        let mut reader = barrel.term_reader("body", None).unwrap().unwrap();
        assert!(!reader.seek("baz").unwrap());
        assert!(reader.term_info().is_none());
        assert!(reader.seek("foo").unwrap());
        assert_eq!(reader.term_info().unwrap().doc_freq, 3);

        let mut postings = reader.postings().unwrap().unwrap();
        assert_eq!(
            collect_positions(postings.as_mut()).unwrap(),
            vec![(1, vec![0, 4]), (2, vec![3]), (7, vec![2])]
        );
    }

    #[test]
    fn test_term_iterator_with_deletions() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        write_barrel(&storage);
        let caches = BarrelCaches::from_config(&ListingCacheConfig::default());
        let barrel = BarrelReader::open(Arc::clone(&storage), "_0", Some(&caches)).unwrap();

        let deleted = Arc::new(Bitset::from_positions([2]).unwrap());
        let mut iter = barrel.term_iterator("body", Some(deleted)).unwrap().unwrap();
        assert_eq!(iter.term_count(), 3);

        let mut seen = Vec::new();
        while iter.advance().unwrap() {
            let mut postings = iter.postings().unwrap().unwrap();
            let docs: Vec<DocId> = collect_positions(postings.as_mut())
                .unwrap()
                .into_iter()
                .map(|(doc, _)| doc)
                .collect();
            seen.push((iter.term().unwrap().to_string(), docs));
        }
        assert_eq!(
            seen,
            vec![
                ("bar".to_string(), vec![]),
                ("foo".to_string(), vec![1, 7]),
                ("zed".to_string(), vec![7]),
            ]
        );
        assert!(!iter.advance().unwrap());
        assert!(iter.term().is_none());
    }

    #[test]
    fn test_missing_field_table() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        write_barrel(&storage);
        storage.delete_file("_0.fdi").unwrap();
        assert!(BarrelReader::open(Arc::clone(&storage), "_0", None).is_err());
    }
}
