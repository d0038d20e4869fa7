//! Per-field vocabulary sections of the `.voc` file.
//!
//! A section lists the field's terms in ascending byte order, each followed
//! by its [`TermInfo`], and ends with a fixed-size footer:
//!
//! ```text
//! entries    : (vu32 len, term bytes, vu32 doc_freq, vu64 ctf,
//!               vu64 posting_offset, vu64 posting_length,
//!               vu64 position_length)*
//! footer     : u32 version, u64 descriptor length, u64 term count
//! ```
//!
//! The descriptor length is the byte length of the entries. Writers buffer
//! entries in a [`TermEntryRing`] and drain it to the output whenever it
//! fills up.

use std::collections::VecDeque;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::error::{BarrelError, Result};
use crate::posting::TermInfo;
use crate::storage::{ByteView, StorageOutput};
use crate::util::varint;

/// Format version written into every vocabulary footer.
pub const VOCABULARY_FORMAT_VERSION: u32 = 1;

/// Size of the vocabulary footer in bytes.
pub const FOOTER_LEN: usize = 4 + 8 + 8;

/// One vocabulary entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermEntry {
    pub term: String,
    pub info: TermInfo,
}

/// Fixed-capacity FIFO of term entries awaiting output.
#[derive(Debug)]
pub struct TermEntryRing {
    entries: VecDeque<TermEntry>,
    capacity: usize,
}

impl TermEntryRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        TermEntryRing {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Queue an entry. Returns it back if the ring is full.
    pub fn push(&mut self, entry: TermEntry) -> std::result::Result<(), TermEntry> {
        if self.is_full() {
            return Err(entry);
        }
        self.entries.push_back(entry);
        Ok(())
    }

    /// Remove every queued entry, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = TermEntry> + '_ {
        self.entries.drain(..)
    }
}

/// Location of a finished vocabulary section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VocabularySection {
    pub offset: u64,
    pub length: u64,
    pub term_count: u64,
}

/// Writes one field's vocabulary section.
#[derive(Debug)]
pub struct VocabularyWriter {
    ring: TermEntryRing,
    offset: u64,
    written: u64,
    term_count: u64,
    last_term: Option<String>,
    buffer: Vec<u8>,
}

impl VocabularyWriter {
    /// Start a section at the output's current position.
    pub fn new(output: &dyn StorageOutput, ring_capacity: usize) -> Self {
        VocabularyWriter {
            ring: TermEntryRing::new(ring_capacity),
            offset: output.position(),
            written: 0,
            term_count: 0,
            last_term: None,
            buffer: Vec::new(),
        }
    }

    pub fn term_count(&self) -> u64 {
        self.term_count
    }

    /// Add a term. Terms must arrive in strictly ascending order.
    pub fn add(&mut self, output: &mut dyn StorageOutput, term: &str, info: TermInfo) -> Result<()> {
        if let Some(last) = &self.last_term
            && term.as_bytes() <= last.as_bytes()
        {
            return Err(BarrelError::invalid_argument(format!(
                "term {term:?} added after {last:?}"
            )));
        }
        self.last_term = Some(term.to_string());
        self.term_count += 1;

        let entry = TermEntry {
            term: term.to_string(),
            info,
        };
        if let Err(entry) = self.ring.push(entry) {
            self.drain(output)?;
            self.ring
                .push(entry)
                .map_err(|_| BarrelError::other("term ring full after drain"))?;
        }
        Ok(())
    }

    fn drain(&mut self, output: &mut dyn StorageOutput) -> Result<()> {
        self.buffer.clear();
        for entry in self.ring.drain() {
            varint::put_u32(&mut self.buffer, entry.term.len() as u32);
            self.buffer.extend_from_slice(entry.term.as_bytes());
            varint::put_u32(&mut self.buffer, entry.info.doc_freq);
            varint::put_u64(&mut self.buffer, entry.info.ctf);
            varint::put_u64(&mut self.buffer, entry.info.posting_offset);
            varint::put_u64(&mut self.buffer, entry.info.posting_length);
            varint::put_u64(&mut self.buffer, entry.info.position_length);
        }
        output.write_all(&self.buffer)?;
        self.written += self.buffer.len() as u64;
        Ok(())
    }

    /// Flush the remaining entries and write the footer.
    pub fn finish(mut self, output: &mut dyn StorageOutput) -> Result<VocabularySection> {
        self.drain(output)?;

        let mut footer = Vec::with_capacity(FOOTER_LEN);
        footer.write_u32::<LittleEndian>(VOCABULARY_FORMAT_VERSION)?;
        footer.write_u64::<LittleEndian>(self.written)?;
        footer.write_u64::<LittleEndian>(self.term_count)?;
        output.write_all(&footer)?;

        Ok(VocabularySection {
            offset: self.offset,
            length: self.written + FOOTER_LEN as u64,
            term_count: self.term_count,
        })
    }
}

/// A parsed vocabulary section, searchable by term.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    terms: Vec<String>,
    infos: Vec<TermInfo>,
}

impl Vocabulary {
    /// Parse a whole section, footer included.
    pub fn parse(section: &[u8]) -> Result<Self> {
        if section.len() < FOOTER_LEN {
            return Err(BarrelError::corruption(format!(
                "vocabulary section of {} bytes has no footer",
                section.len()
            )));
        }
        let (entries, footer) = section.split_at(section.len() - FOOTER_LEN);
        let mut view = ByteView::new(footer);
        let version = view.read_u32()?;
        let descriptor_length = view.read_u64()?;
        let term_count = view.read_u64()?;

        if version != VOCABULARY_FORMAT_VERSION {
            return Err(BarrelError::corruption(format!(
                "unsupported vocabulary version {version}"
            )));
        }
        if descriptor_length != entries.len() as u64 {
            return Err(BarrelError::corruption(format!(
                "vocabulary footer records {descriptor_length} bytes of entries, found {}",
                entries.len()
            )));
        }

        let capacity = (term_count as usize).min(entries.len());
        let mut terms: Vec<String> = Vec::with_capacity(capacity);
        let mut infos = Vec::with_capacity(capacity);
        let mut view = ByteView::new(entries);
        while view.remaining() > 0 {
            let term = view.read_string()?;
            if let Some(last) = terms.last()
                && term.as_bytes() <= last.as_bytes()
            {
                return Err(BarrelError::corruption(format!(
                    "vocabulary term {term:?} out of order after {last:?}"
                )));
            }
            let info = TermInfo {
                doc_freq: view.read_vu32()?,
                ctf: view.read_vu64()?,
                posting_offset: view.read_vu64()?,
                posting_length: view.read_vu64()?,
                position_length: view.read_vu64()?,
            };
            terms.push(term);
            infos.push(info);
        }
        if terms.len() as u64 != term_count {
            return Err(BarrelError::corruption(format!(
                "vocabulary footer records {term_count} terms, found {}",
                terms.len()
            )));
        }
        Ok(Vocabulary { terms, infos })
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Index of `term`, or the index it would be inserted at.
    pub fn search(&self, term: &str) -> std::result::Result<usize, usize> {
        self.terms
            .binary_search_by(|probe| probe.as_bytes().cmp(term.as_bytes()))
    }

    pub fn get(&self, term: &str) -> Option<&TermInfo> {
        self.search(term).ok().map(|idx| &self.infos[idx])
    }

    pub fn term(&self, idx: usize) -> Option<&str> {
        self.terms.get(idx).map(String::as_str)
    }

    pub fn info(&self, idx: usize) -> Option<&TermInfo> {
        self.infos.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TermInfo)> {
        self.terms.iter().map(String::as_str).zip(self.infos.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, Storage};

    fn info(doc_freq: u32) -> TermInfo {
        TermInfo {
            doc_freq,
            ctf: doc_freq as u64 * 2,
            posting_offset: doc_freq as u64 * 100,
            posting_length: 40,
            position_length: 12,
        }
    }

    fn write_section(terms: &[(&str, u32)], ring: usize) -> (MemoryStorage, VocabularySection) {
        let storage = MemoryStorage::new();
        let mut output = storage.create_output("t.voc").unwrap();
        output.write_all(b"prefix").unwrap();

        let mut writer = VocabularyWriter::new(output.as_ref(), ring);
        for &(term, df) in terms {
            writer.add(output.as_mut(), term, info(df)).unwrap();
        }
        let section = writer.finish(output.as_mut()).unwrap();
        output.close().unwrap();
        (storage, section)
    }

    fn read_section(storage: &MemoryStorage, section: &VocabularySection) -> Vocabulary {
        let bytes = storage.file_bytes("t.voc").unwrap();
        let start = section.offset as usize;
        Vocabulary::parse(&bytes[start..start + section.length as usize]).unwrap()
    }

    #[test]
    fn test_ring_drains_in_order() {
        let mut ring = TermEntryRing::new(2);
        let entry = |t: &str| TermEntry {
            term: t.to_string(),
            info: TermInfo::default(),
        };
        ring.push(entry("a")).unwrap();
        ring.push(entry("b")).unwrap();
        assert!(ring.is_full());
        assert_eq!(ring.push(entry("c")).unwrap_err().term, "c");

        let drained: Vec<String> = ring.drain().map(|e| e.term).collect();
        assert_eq!(drained, vec!["a", "b"]);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_section_round_trip_with_small_ring() {
        let terms = [("apple", 3), ("banana", 1), ("cherry", 7), ("date", 2), ("fig", 4)];
        let (storage, section) = write_section(&terms, 2);
        assert_eq!(section.offset, 6);
        assert_eq!(section.term_count, 5);

        let vocabulary = read_section(&storage, &section);
        assert_eq!(vocabulary.len(), 5);
        assert_eq!(vocabulary.get("cherry"), Some(&info(7)));
        assert_eq!(vocabulary.get("coconut"), None);
        assert_eq!(vocabulary.search("coconut"), Err(3));

        let listed: Vec<&str> = vocabulary.iter().map(|(t, _)| t).collect();
        assert_eq!(listed, vec!["apple", "banana", "cherry", "date", "fig"]);
    }

    #[test]
    fn test_empty_section() {
        let (storage, section) = write_section(&[], 4);
        assert_eq!(section.length, FOOTER_LEN as u64);
        assert!(read_section(&storage, &section).is_empty());
    }

    #[test]
    fn test_rejects_unsorted_terms() {
        let storage = MemoryStorage::new();
        let mut output = storage.create_output("t.voc").unwrap();
        let mut writer = VocabularyWriter::new(output.as_ref(), 4);
        writer.add(output.as_mut(), "m", info(1)).unwrap();
        assert!(writer.add(output.as_mut(), "m", info(1)).is_err());
        assert!(writer.add(output.as_mut(), "a", info(1)).is_err());
    }

    #[test]
    fn test_footer_mismatch_is_corruption() {
        let (storage, section) = write_section(&[("a", 1), ("b", 2)], 8);
        let bytes = storage.file_bytes("t.voc").unwrap();
        let start = section.offset as usize;
        let mut damaged = bytes[start..start + section.length as usize].to_vec();
        let count_at = damaged.len() - 8;
        damaged[count_at] = 9;
        assert!(Vocabulary::parse(&damaged).unwrap_err().is_corruption());
        assert!(Vocabulary::parse(&damaged[..10]).unwrap_err().is_corruption());
    }
}
