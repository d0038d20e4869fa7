//! Append-only in-memory posting list of the barrel being written.

use crate::error::{BarrelError, Result};
use crate::posting::PostingReader;
use crate::posting::encoder::PostingEncoder;
use crate::posting::memory::MemPostingReader;
use crate::types::{DocId, Position};
use crate::util::varint;

/// Skip pointer into the in-memory streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemSkip {
    /// Last doc id before the pointer.
    pub last_doc_id: DocId,
    /// Documents before the pointer.
    pub docs_before: u32,
    pub doc_offset: usize,
    pub pos_offset: usize,
}

/// Accumulates the postings of one term.
///
/// Occurrences are added with [`MemPostingWriter::add`]; a document becomes
/// visible to readers once [`MemPostingWriter::end_document`] is called or
/// an occurrence of a later document arrives. The doc stream holds, per
/// document, the gap to the previous doc id, the frequency and (when
/// positions are kept) the byte length of its position deltas.
#[derive(Debug, Clone)]
pub struct MemPostingWriter {
    doc_stream: Vec<u8>,
    pos_stream: Vec<u8>,
    skips: Vec<MemSkip>,
    skip_every: u32,
    with_positions: bool,

    doc_freq: u32,
    ctf: u64,
    last_doc_id: Option<DocId>,

    cur_doc: Option<DocId>,
    cur_positions: Vec<Position>,
}

impl MemPostingWriter {
    /// `skip_every` is the number of documents between skip pointers.
    pub fn new(with_positions: bool, skip_every: usize) -> Self {
        MemPostingWriter {
            doc_stream: Vec::new(),
            pos_stream: Vec::new(),
            skips: Vec::new(),
            skip_every: skip_every.max(1) as u32,
            with_positions,
            doc_freq: 0,
            ctf: 0,
            last_doc_id: None,
            cur_doc: None,
            cur_positions: Vec::new(),
        }
    }

    /// Record one occurrence of the term.
    pub fn add(&mut self, doc_id: DocId, position: Position) -> Result<()> {
        match self.cur_doc {
            Some(doc) if doc == doc_id => {}
            Some(_) => {
                self.end_document();
                self.start_document(doc_id)?;
            }
            None => self.start_document(doc_id)?,
        }
        self.cur_positions.push(position);
        Ok(())
    }

    fn start_document(&mut self, doc_id: DocId) -> Result<()> {
        if let Some(last) = self.last_doc_id
            && doc_id <= last
        {
            return Err(BarrelError::invalid_argument(format!(
                "doc {doc_id} added after doc {last}"
            )));
        }
        self.cur_doc = Some(doc_id);
        self.cur_positions.clear();
        Ok(())
    }

    /// Finalize the current document, if any.
    pub fn end_document(&mut self) {
        let Some(doc) = self.cur_doc.take() else {
            return;
        };
        self.cur_positions.sort_unstable();

        let freq = self.cur_positions.len() as u32;
        let delta = doc - self.last_doc_id.unwrap_or(0);
        varint::put_u32(&mut self.doc_stream, delta);
        varint::put_u32(&mut self.doc_stream, freq);

        if self.with_positions {
            let start = self.pos_stream.len();
            let mut prev = 0;
            for &pos in &self.cur_positions {
                varint::put_u32(&mut self.pos_stream, pos - prev);
                prev = pos;
            }
            varint::put_u32(&mut self.doc_stream, (self.pos_stream.len() - start) as u32);
        }

        self.doc_freq += 1;
        self.ctf += freq as u64;
        self.last_doc_id = Some(doc);

        if self.doc_freq % self.skip_every == 0 {
            self.skips.push(MemSkip {
                last_doc_id: doc,
                docs_before: self.doc_freq,
                doc_offset: self.doc_stream.len(),
                pos_offset: self.pos_stream.len(),
            });
        }
    }

    pub fn with_positions(&self) -> bool {
        self.with_positions
    }

    /// Finalized documents.
    pub fn doc_freq(&self) -> u32 {
        self.doc_freq
    }

    pub fn ctf(&self) -> u64 {
        self.ctf
    }

    pub fn last_doc_id(&self) -> Option<DocId> {
        self.last_doc_id
    }

    pub fn is_empty(&self) -> bool {
        self.doc_freq == 0
    }

    /// Approximate heap bytes held by the writer.
    pub fn memory_usage(&self) -> usize {
        self.doc_stream.capacity()
            + self.pos_stream.capacity()
            + self.skips.capacity() * std::mem::size_of::<MemSkip>()
            + self.cur_positions.capacity() * std::mem::size_of::<Position>()
    }

    pub(crate) fn doc_stream(&self) -> &[u8] {
        &self.doc_stream
    }

    pub(crate) fn pos_stream(&self) -> &[u8] {
        &self.pos_stream
    }

    pub(crate) fn skips(&self) -> &[MemSkip] {
        &self.skips
    }

    /// Reader over the finalized documents.
    pub fn reader(&self) -> MemPostingReader<'_> {
        MemPostingReader::new(self)
    }

    /// Feed every finalized document to `encoder`.
    pub fn encode(&self, encoder: &mut PostingEncoder) -> Result<()> {
        let mut reader = self.reader();
        let mut docs = [0; 128];
        let mut freqs = [0; 128];
        let mut positions = Vec::new();
        loop {
            let n = reader.decode_next(&mut docs, &mut freqs)?;
            if n == 0 {
                return Ok(());
            }
            for i in 0..n {
                reader.decode_next_positions(&mut positions)?;
                encoder.push(docs[i], freqs[i], &positions)?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posting::{collect_positions, collect_postings};

    #[test]
    fn test_documents_become_visible_when_finished() {
        let mut writer = MemPostingWriter::new(true, 4);
        writer.add(1, 0).unwrap();
        writer.add(1, 3).unwrap();
        assert_eq!(writer.doc_freq(), 0);

        writer.add(5, 2).unwrap();
        assert_eq!(writer.doc_freq(), 1);
        writer.end_document();
        writer.end_document();
        assert_eq!(writer.doc_freq(), 2);
        assert_eq!(writer.ctf(), 3);
        assert_eq!(writer.last_doc_id(), Some(5));
    }

    #[test]
    fn test_positions_reset_per_document() {
        let mut writer = MemPostingWriter::new(true, 4);
        for (doc, pos) in [(2, 7), (2, 1), (3, 0), (3, 9), (3, 4)] {
            writer.add(doc, pos).unwrap();
        }
        writer.end_document();

        let mut reader = writer.reader();
        let postings = collect_positions(&mut reader).unwrap();
        assert_eq!(postings, vec![(2, vec![1, 7]), (3, vec![0, 4, 9])]);
    }

    #[test]
    fn test_rejects_out_of_order_documents() {
        let mut writer = MemPostingWriter::new(false, 4);
        writer.add(10, 0).unwrap();
        writer.end_document();
        assert!(writer.add(10, 1).is_err());
        assert!(writer.add(9, 1).is_err());
        writer.add(11, 1).unwrap();
        writer.end_document();

        let mut reader = writer.reader();
        assert_eq!(collect_postings(&mut reader).unwrap(), vec![(10, 1), (11, 1)]);
        assert_eq!(reader.doc_freq(), 2);
    }

    #[test]
    fn test_skip_pointers() {
        let mut writer = MemPostingWriter::new(false, 3);
        for doc in 0..10 {
            writer.add(doc * 2, 0).unwrap();
        }
        writer.end_document();

        let skips: Vec<(DocId, u32)> = writer
            .skips()
            .iter()
            .map(|s| (s.last_doc_id, s.docs_before))
            .collect();
        assert_eq!(skips, vec![(4, 3), (10, 6), (16, 9)]);
    }
}
