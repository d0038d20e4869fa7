//! Reader over an in-memory posting list.

use std::sync::Arc;

use crate::bitset::Bitset;
use crate::error::{BarrelError, Result};
use crate::posting::writer::{MemPostingWriter, MemSkip};
use crate::posting::{DecodeTo, PostingReader};
use crate::storage::ByteView;
use crate::types::{DocId, Position};

/// Reads the documents a [`MemPostingWriter`] had finalized when the reader
/// was created.
#[derive(Debug)]
pub struct MemPostingReader<'a> {
    doc_stream: &'a [u8],
    pos_stream: &'a [u8],
    skips: &'a [MemSkip],
    with_positions: bool,
    doc_freq: u32,
    ctf: u64,
    last_doc_id: Option<DocId>,
    deleted: Option<Arc<Bitset>>,

    doc_offset: usize,
    pos_offset: usize,
    prev_doc: DocId,
    delivered: u32,

    batch_freqs: Vec<u32>,
    batch_pos_offsets: Vec<usize>,
    pos_cursor: usize,
}

impl<'a> MemPostingReader<'a> {
    pub fn new(writer: &'a MemPostingWriter) -> Self {
        MemPostingReader {
            doc_stream: writer.doc_stream(),
            pos_stream: writer.pos_stream(),
            skips: writer.skips(),
            with_positions: writer.with_positions(),
            doc_freq: writer.doc_freq(),
            ctf: writer.ctf(),
            last_doc_id: writer.last_doc_id(),
            deleted: None,
            doc_offset: 0,
            pos_offset: 0,
            prev_doc: 0,
            delivered: 0,
            batch_freqs: Vec::new(),
            batch_pos_offsets: Vec::new(),
            pos_cursor: 0,
        }
    }

    /// Skip documents set in `deleted`.
    pub fn with_deleted(mut self, deleted: Option<Arc<Bitset>>) -> Self {
        self.deleted = deleted.filter(|d| d.any());
        self
    }

    /// Decode the next document from the doc stream.
    fn next_entry(&mut self) -> Result<Option<(DocId, u32, usize)>> {
        if self.delivered >= self.doc_freq {
            return Ok(None);
        }
        let mut view = ByteView::new(self.doc_stream);
        view.seek(self.doc_offset)?;
        let delta = view.read_vu32()?;
        let freq = view.read_vu32()?;
        let pos_len = if self.with_positions {
            view.read_vu32()? as usize
        } else {
            0
        };

        let doc = self
            .prev_doc
            .checked_add(delta)
            .ok_or_else(|| BarrelError::corruption("doc id overflow in memory posting"))?;
        let pos_offset = self.pos_offset;

        self.doc_offset = view.offset();
        self.pos_offset += pos_len;
        self.prev_doc = doc;
        self.delivered += 1;
        Ok(Some((doc, freq, pos_offset)))
    }

    fn is_deleted(&self, doc: DocId) -> bool {
        self.deleted
            .as_ref()
            .is_some_and(|deleted| deleted.test(doc as usize))
    }

    fn fill(
        &mut self,
        first: Option<(DocId, u32, usize)>,
        docs: &mut [DocId],
        freqs: &mut [u32],
    ) -> Result<usize> {
        self.batch_freqs.clear();
        self.batch_pos_offsets.clear();
        self.pos_cursor = 0;

        let capacity = docs.len().min(freqs.len());
        let mut n = 0;
        let mut pending = first;
        while n < capacity {
            let entry = match pending.take() {
                Some(entry) => entry,
                None => match self.next_entry()? {
                    Some(entry) => entry,
                    None => break,
                },
            };
            let (doc, freq, pos_offset) = entry;
            if self.is_deleted(doc) {
                continue;
            }
            docs[n] = doc;
            freqs[n] = freq;
            self.batch_freqs.push(freq);
            self.batch_pos_offsets.push(pos_offset);
            n += 1;
        }
        Ok(n)
    }
}

impl PostingReader for MemPostingReader<'_> {
    fn doc_freq(&self) -> u32 {
        self.doc_freq
    }

    fn ctf(&self) -> u64 {
        self.ctf
    }

    fn last_doc_id(&self) -> Option<DocId> {
        self.last_doc_id
    }

    fn cur_tf(&self) -> u32 {
        self.batch_freqs.get(self.pos_cursor).copied().unwrap_or(0)
    }

    fn decode_next(&mut self, docs: &mut [DocId], freqs: &mut [u32]) -> Result<usize> {
        self.fill(None, docs, freqs)
    }

    fn decode_to(
        &mut self,
        target: DocId,
        docs: &mut [DocId],
        freqs: &mut [u32],
    ) -> Result<Option<DecodeTo>> {
        match self.last_doc_id {
            Some(last) if target <= last => {}
            _ => return Ok(None),
        }

        let jump = self
            .skips
            .iter()
            .rev()
            .find(|skip| skip.last_doc_id < target)
            .copied();
        if let Some(skip) = jump
            && skip.docs_before > self.delivered
        {
            self.doc_offset = skip.doc_offset;
            self.pos_offset = skip.pos_offset;
            self.prev_doc = skip.last_doc_id;
            self.delivered = skip.docs_before;
        }

        loop {
            let Some(entry) = self.next_entry()? else {
                return Ok(None);
            };
            if entry.0 >= target && !self.is_deleted(entry.0) {
                let count = self.fill(Some(entry), docs, freqs)?;
                if count == 0 {
                    return Ok(None);
                }
                return Ok(Some(DecodeTo {
                    count,
                    cursor: 0,
                    last_doc_id: docs[count - 1],
                }));
            }
        }
    }

    fn decode_next_positions(&mut self, out: &mut Vec<Position>) -> Result<usize> {
        out.clear();
        let Some(&freq) = self.batch_freqs.get(self.pos_cursor) else {
            return Ok(0);
        };
        if self.with_positions {
            let mut view = ByteView::new(self.pos_stream);
            view.seek(self.batch_pos_offsets[self.pos_cursor])?;
            let mut pos: Position = 0;
            for _ in 0..freq {
                pos += view.read_vu32()?;
                out.push(pos);
            }
        }
        self.pos_cursor += 1;
        Ok(out.len())
    }

    fn reset_position(&mut self) {
        self.pos_cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posting::collect_postings;

    fn writer(docs: &[(DocId, &[Position])]) -> MemPostingWriter {
        let mut writer = MemPostingWriter::new(true, 4);
        for &(doc, positions) in docs {
            for &pos in positions {
                writer.add(doc, pos).unwrap();
            }
        }
        writer.end_document();
        writer
    }

    #[test]
    fn test_scenario_a() {
        let writer = writer(&[(1, &[0, 1]), (5, &[0]), (9, &[0, 1, 2])]);
        let mut reader = writer.reader();

        let mut docs = [0; 8];
        let mut freqs = [0; 8];
        let n = reader.decode_next(&mut docs, &mut freqs).unwrap();
        assert_eq!(n, 3);
        assert_eq!(&docs[..n], &[1, 5, 9]);
        assert_eq!(&freqs[..n], &[2, 1, 3]);
        assert_eq!(reader.decode_next(&mut docs, &mut freqs).unwrap(), 0);
    }

    #[test]
    fn test_small_buffers() {
        let writer = writer(&[(1, &[0]), (2, &[0]), (3, &[0]), (4, &[0]), (5, &[0])]);
        let mut reader = writer.reader();
        let mut docs = [0; 2];
        let mut freqs = [0; 2];
        let mut seen = Vec::new();
        loop {
            let n = reader.decode_next(&mut docs, &mut freqs).unwrap();
            if n == 0 {
                break;
            }
            assert!(n <= 2);
            seen.extend_from_slice(&docs[..n]);
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_decode_to_uses_skips() {
        let mut writer = MemPostingWriter::new(true, 4);
        for doc in 0..100u32 {
            writer.add(doc * 3, doc % 7).unwrap();
        }
        writer.end_document();

        let mut reader = writer.reader();
        let mut docs = [0; 4];
        let mut freqs = [0; 4];
        let hit = reader.decode_to(200, &mut docs, &mut freqs).unwrap().unwrap();
        assert_eq!(hit.count, 4);
        assert_eq!(docs[hit.cursor], 201);
        assert_eq!(hit.last_doc_id, 210);

        let mut positions = Vec::new();
        assert_eq!(reader.cur_tf(), 1);
        reader.decode_next_positions(&mut positions).unwrap();
        assert_eq!(positions, vec![67 % 7]);

        // The next batch continues after the returned one.
        let n = reader.decode_next(&mut docs, &mut freqs).unwrap();
        assert_eq!(docs[0], 213);
        assert_eq!(n, 4);

        assert!(reader.decode_to(298, &mut docs, &mut freqs).unwrap().is_none());
    }

    #[test]
    fn test_decode_to_past_end_is_not_an_error() {
        let writer = writer(&[(4, &[1])]);
        let mut reader = writer.reader();
        let mut docs = [0; 4];
        let mut freqs = [0; 4];
        assert!(reader.decode_to(5, &mut docs, &mut freqs).unwrap().is_none());
        let hit = reader.decode_to(4, &mut docs, &mut freqs).unwrap().unwrap();
        assert_eq!((hit.count, hit.last_doc_id), (1, 4));
    }

    #[test]
    fn test_deleted_documents_are_skipped() {
        let writer = writer(&[(1, &[0]), (2, &[3]), (3, &[1, 2])]);
        let deleted = Arc::new(Bitset::from_positions([2]).unwrap());
        let mut reader = writer.reader().with_deleted(Some(deleted));
        assert_eq!(collect_postings(&mut reader).unwrap(), vec![(1, 1), (3, 2)]);
    }

    #[test]
    fn test_reset_position() {
        let writer = writer(&[(1, &[4, 8]), (2, &[6])]);
        let mut reader = writer.reader();
        let mut docs = [0; 4];
        let mut freqs = [0; 4];
        reader.decode_next(&mut docs, &mut freqs).unwrap();

        let mut positions = Vec::new();
        assert_eq!(reader.decode_next_positions(&mut positions).unwrap(), 2);
        assert_eq!(reader.decode_next_positions(&mut positions).unwrap(), 1);
        assert_eq!(positions, vec![6]);
        assert_eq!(reader.decode_next_positions(&mut positions).unwrap(), 0);

        reader.reset_position();
        reader.decode_next_positions(&mut positions).unwrap();
        assert_eq!(positions, vec![4, 8]);
    }
}
