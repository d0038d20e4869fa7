//! The barrel currently being written, held in memory.

use std::sync::Arc;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::barrel::field::{FieldInfo, FieldsInfo};
use crate::barrel::term::{TermIterator, TermReader};
use crate::barrel::writer::BarrelWriter;
use crate::bitset::Bitset;
use crate::config::PostingConfig;
use crate::error::{BarrelError, Result};
use crate::posting::{MemPostingWriter, PostingReader, TermInfo};
use crate::storage::Storage;
use crate::types::{DocId, FieldId, Position};

/// Documents between skip pointers of in-memory postings.
const MEM_SKIP_EVERY: usize = 64;

/// The analysed content of one field of one document: every term
/// occurrence with its position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOccurrences {
    pub field: String,
    /// Store positions for this field.
    pub positions: bool,
    pub occurrences: Vec<(String, Position)>,
}

impl FieldOccurrences {
    pub fn new(field: impl Into<String>) -> Self {
        FieldOccurrences {
            field: field.into(),
            positions: true,
            occurrences: Vec::new(),
        }
    }

    /// Occurrences taken from a token stream, positions numbered from 0.
    pub fn from_tokens<I, S>(field: impl Into<String>, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut occurrences = Self::new(field);
        for (pos, token) in tokens.into_iter().enumerate() {
            occurrences.add(token, pos as Position);
        }
        occurrences
    }

    pub fn without_positions(mut self) -> Self {
        self.positions = false;
        self
    }

    pub fn add(&mut self, term: impl Into<String>, position: Position) -> &mut Self {
        self.occurrences.push((term.into(), position));
        self
    }
}

/// Postings of one field of the in-memory barrel.
#[derive(Debug)]
pub struct FieldIndexer {
    info: FieldInfo,
    lookup: AHashMap<String, usize>,
    terms: Vec<String>,
    writers: Vec<MemPostingWriter>,
    touched: Vec<usize>,
    term_bytes: usize,
}

impl FieldIndexer {
    pub fn new(info: FieldInfo) -> Self {
        FieldIndexer {
            info,
            lookup: AHashMap::new(),
            terms: Vec::new(),
            writers: Vec::new(),
            touched: Vec::new(),
            term_bytes: 0,
        }
    }

    pub fn info(&self) -> &FieldInfo {
        &self.info
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    /// Record an occurrence in document `doc`.
    pub fn add(&mut self, doc: DocId, term: &str, position: Position) -> Result<()> {
        let idx = match self.lookup.get(term) {
            Some(&idx) => idx,
            None => {
                let idx = self.writers.len();
                self.lookup.insert(term.to_string(), idx);
                self.terms.push(term.to_string());
                self.writers
                    .push(MemPostingWriter::new(self.info.has_positions(), MEM_SKIP_EVERY));
                self.term_bytes += term.len() * 2;
                idx
            }
        };
        self.writers[idx].add(doc, position)?;
        self.touched.push(idx);
        Ok(())
    }

    /// Make the current document visible to readers.
    pub fn end_document(&mut self) {
        for idx in self.touched.drain(..) {
            self.writers[idx].end_document();
        }
    }

    /// Term indexes in ascending term order.
    fn sorted(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.terms.len()).collect();
        order.sort_unstable_by(|&a, &b| self.terms[a].as_bytes().cmp(self.terms[b].as_bytes()));
        order
    }

    pub fn memory_usage(&self) -> usize {
        self.term_bytes
            + self.writers.iter().map(MemPostingWriter::memory_usage).sum::<usize>()
            + self.writers.capacity() * std::mem::size_of::<MemPostingWriter>()
    }

    pub fn term_reader(&self, deleted: Option<Arc<Bitset>>) -> MemTermReader<'_> {
        MemTermReader {
            field: self,
            deleted,
            current: None,
        }
    }

    pub fn term_iterator(&self, deleted: Option<Arc<Bitset>>) -> MemTermIterator<'_> {
        MemTermIterator {
            field: self,
            order: self.sorted(),
            next: 0,
            current: None,
            deleted,
        }
    }

    fn term_info(&self, idx: usize) -> Option<TermInfo> {
        let writer = &self.writers[idx];
        (!writer.is_empty()).then(|| TermInfo {
            doc_freq: writer.doc_freq(),
            ctf: writer.ctf(),
            ..TermInfo::default()
        })
    }

    fn postings(
        &self,
        idx: usize,
        deleted: Option<&Arc<Bitset>>,
    ) -> Option<Box<dyn PostingReader + '_>> {
        let writer = &self.writers[idx];
        if writer.is_empty() {
            return None;
        }
        Some(Box::new(writer.reader().with_deleted(deleted.cloned())))
    }
}

/// [`TermReader`] over a field of the in-memory barrel.
#[derive(Debug)]
pub struct MemTermReader<'a> {
    field: &'a FieldIndexer,
    deleted: Option<Arc<Bitset>>,
    current: Option<usize>,
}

impl TermReader for MemTermReader<'_> {
    fn seek(&mut self, term: &str) -> Result<bool> {
        self.current = self
            .field
            .lookup
            .get(term)
            .copied()
            .filter(|&idx| !self.field.writers[idx].is_empty());
        Ok(self.current.is_some())
    }

    fn term_info(&self) -> Option<TermInfo> {
        self.current.and_then(|idx| self.field.term_info(idx))
    }

    fn postings(&self) -> Result<Option<Box<dyn PostingReader + '_>>> {
        Ok(self
            .current
            .and_then(|idx| self.field.postings(idx, self.deleted.as_ref())))
    }
}

/// [`TermIterator`] over a field of the in-memory barrel.
///
/// Terms whose only document is still unfinished are skipped.
#[derive(Debug)]
pub struct MemTermIterator<'a> {
    field: &'a FieldIndexer,
    order: Vec<usize>,
    next: usize,
    current: Option<usize>,
    deleted: Option<Arc<Bitset>>,
}

impl TermIterator for MemTermIterator<'_> {
    fn advance(&mut self) -> Result<bool> {
        while let Some(&idx) = self.order.get(self.next) {
            self.next += 1;
            if !self.field.writers[idx].is_empty() {
                self.current = Some(idx);
                return Ok(true);
            }
        }
        self.current = None;
        Ok(false)
    }

    fn term(&self) -> Option<&str> {
        self.current.map(|idx| self.field.terms[idx].as_str())
    }

    fn term_info(&self) -> Option<TermInfo> {
        self.current.and_then(|idx| self.field.term_info(idx))
    }

    fn postings(&self) -> Result<Option<Box<dyn PostingReader + '_>>> {
        Ok(self
            .current
            .and_then(|idx| self.field.postings(idx, self.deleted.as_ref())))
    }
}

/// In-memory barrel: one [`FieldIndexer`] per field that received
/// occurrences.
#[derive(Debug)]
pub struct MemBarrel {
    name: String,
    fields: AHashMap<FieldId, FieldIndexer>,
    last_doc_id: Option<DocId>,
    doc_count: u32,
}

impl MemBarrel {
    pub fn new(name: impl Into<String>) -> Self {
        MemBarrel {
            name: name.into(),
            fields: AHashMap::new(),
            last_doc_id: None,
            doc_count: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    pub fn is_empty(&self) -> bool {
        self.doc_count == 0
    }

    pub fn last_doc_id(&self) -> Option<DocId> {
        self.last_doc_id
    }

    /// Index one document. Every field must be registered in `schema`.
    pub fn add_document(
        &mut self,
        doc_id: DocId,
        fields: &[FieldOccurrences],
        schema: &FieldsInfo,
    ) -> Result<()> {
        if let Some(last) = self.last_doc_id
            && doc_id <= last
        {
            return Err(BarrelError::invalid_argument(format!(
                "doc {doc_id} added after doc {last}"
            )));
        }

        let infos = fields
            .iter()
            .map(|occurrences| {
                schema.get_by_name(&occurrences.field).ok_or_else(|| {
                    BarrelError::invalid_argument(format!("unknown field {}", occurrences.field))
                })
            })
            .collect::<Result<Vec<&FieldInfo>>>()?;

        let mut touched = Vec::with_capacity(fields.len());
        for (occurrences, info) in fields.iter().zip(infos) {
            let indexer = self
                .fields
                .entry(info.id)
                .or_insert_with(|| FieldIndexer::new(info.clone()));
            for (term, pos) in &occurrences.occurrences {
                indexer.add(doc_id, term, *pos)?;
            }
            touched.push(info.id);
        }
        for id in touched {
            if let Some(indexer) = self.fields.get_mut(&id) {
                indexer.end_document();
            }
        }

        self.last_doc_id = Some(doc_id);
        self.doc_count += 1;
        Ok(())
    }

    pub fn field(&self, id: FieldId) -> Option<&FieldIndexer> {
        self.fields.get(&id)
    }

    pub fn memory_usage(&self) -> usize {
        self.fields.values().map(FieldIndexer::memory_usage).sum()
    }

    /// Write the barrel's files and return its field table.
    pub fn flush(
        &self,
        storage: Arc<dyn Storage>,
        config: &PostingConfig,
        ring_capacity: usize,
    ) -> Result<FieldsInfo> {
        let mut writer = BarrelWriter::create(storage, &self.name, config, ring_capacity)?;
        match self.write_fields(&mut writer) {
            Ok(()) => writer.finish(),
            Err(e) => {
                writer.abort();
                Err(e)
            }
        }
    }

    fn write_fields(&self, writer: &mut BarrelWriter) -> Result<()> {
        let mut ids: Vec<FieldId> = self.fields.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            let indexer = &self.fields[&id];
            writer.start_field(indexer.info.clone())?;
            for idx in indexer.sorted() {
                let postings = &indexer.writers[idx];
                writer.write_term(&indexer.terms[idx], |encoder| postings.encode(encoder))?;
            }
        }
        Ok(())
    }
}
