//! Writes postings in the on-disk chunk format.
//!
//! A posting in the `.dfp` file is laid out as
//!
//! ```text
//! descriptor   doc_freq, ctf, position_offset, position_length,
//!              chunk_count, last_doc_id, header_length, skip_length
//! header       one ChunkHeader per chunk
//! skip list    only for postings longer than one skip interval
//! payloads     doc payload of every chunk
//! ```
//!
//! while its position payloads go to the `.pop` file, back to back.

use crate::config::{Codec, PostingConfig};
use crate::error::{BarrelError, Result};
use crate::posting::TermInfo;
use crate::posting::block::ChunkHeader;
use crate::posting::chunk::{encode_chunk, encode_positions, rebase_chunk};
use crate::posting::skip::{SkipEntry, SkipList};
use crate::storage::{ByteView, StorageOutput};
use crate::types::{DocId, Position};
use crate::util::varint;

/// Fixed part of an on-disk posting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostingDescriptor {
    pub doc_freq: u32,
    pub ctf: u64,
    /// Absolute offset of the term's positions in the `.pop` file.
    pub position_offset: u64,
    pub position_length: u64,
    pub chunk_count: u32,
    pub last_doc_id: DocId,
    pub header_length: u32,
    pub skip_length: u32,
}

impl PostingDescriptor {
    /// Largest encoded size of a descriptor.
    pub const MAX_LEN: usize = 5 * varint::MAX_VU32_LEN + 3 * varint::MAX_VU64_LEN;

    pub fn encode(&self, out: &mut Vec<u8>) {
        varint::put_u32(out, self.doc_freq);
        varint::put_u64(out, self.ctf);
        varint::put_u64(out, self.position_offset);
        varint::put_u64(out, self.position_length);
        varint::put_u32(out, self.chunk_count);
        varint::put_u32(out, self.last_doc_id);
        varint::put_u32(out, self.header_length);
        varint::put_u32(out, self.skip_length);
    }

    pub fn decode(view: &mut ByteView<'_>) -> Result<Self> {
        let descriptor = PostingDescriptor {
            doc_freq: view.read_vu32()?,
            ctf: view.read_vu64()?,
            position_offset: view.read_vu64()?,
            position_length: view.read_vu64()?,
            chunk_count: view.read_vu32()?,
            last_doc_id: view.read_vu32()?,
            header_length: view.read_vu32()?,
            skip_length: view.read_vu32()?,
        };
        if descriptor.doc_freq == 0 || descriptor.chunk_count == 0 {
            return Err(BarrelError::corruption("empty posting descriptor"));
        }
        if descriptor.chunk_count > descriptor.doc_freq {
            return Err(BarrelError::corruption(format!(
                "{} chunks for {} documents",
                descriptor.chunk_count, descriptor.doc_freq
            )));
        }
        Ok(descriptor)
    }
}

/// Summary of what [`PostingEncoder::finish`] wrote.
pub type EncodedPosting = TermInfo;

/// Builds one term's posting at a time; reusable across terms.
#[derive(Debug)]
pub struct PostingEncoder {
    codec: Codec,
    chunk_size: usize,
    skip_interval: usize,
    max_skip_level: usize,
    with_positions: bool,

    docs: Vec<DocId>,
    freqs: Vec<u32>,
    positions: Vec<Position>,

    header: Vec<u8>,
    chunk_ends: Vec<SkipEntry>,
    doc_payload: Vec<u8>,
    pos_payload: Vec<u8>,
    prev_last_doc_id: DocId,
    last_doc_id: Option<DocId>,
    doc_freq: u32,
    ctf: u64,
}

impl PostingEncoder {
    pub fn new(config: &PostingConfig, codec: Codec, with_positions: bool) -> Self {
        PostingEncoder {
            codec,
            chunk_size: config.chunk_size.max(1),
            skip_interval: config.skip_interval,
            max_skip_level: config.max_skip_level,
            with_positions,
            docs: Vec::with_capacity(config.chunk_size),
            freqs: Vec::with_capacity(config.chunk_size),
            positions: Vec::new(),
            header: Vec::new(),
            chunk_ends: Vec::new(),
            doc_payload: Vec::new(),
            pos_payload: Vec::new(),
            prev_last_doc_id: 0,
            last_doc_id: None,
            doc_freq: 0,
            ctf: 0,
        }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn with_positions(&self) -> bool {
        self.with_positions
    }

    /// Documents pushed or copied so far for the current term.
    pub fn doc_freq(&self) -> u32 {
        self.doc_freq
    }

    pub fn last_doc_id(&self) -> Option<DocId> {
        self.last_doc_id
    }

    /// Append one document. Doc ids must strictly increase; `positions` is
    /// ignored unless the encoder stores positions, in which case it must
    /// hold exactly `freq` entries.
    pub fn push(&mut self, doc: DocId, freq: u32, positions: &[Position]) -> Result<()> {
        if let Some(last) = self.last_doc_id
            && doc <= last
        {
            return Err(BarrelError::invalid_argument(format!(
                "doc {doc} pushed after doc {last}"
            )));
        }
        if freq == 0 {
            return Err(BarrelError::invalid_argument(format!(
                "doc {doc} pushed with zero frequency"
            )));
        }
        if self.with_positions {
            if positions.len() != freq as usize {
                return Err(BarrelError::invalid_argument(format!(
                    "doc {doc} has frequency {freq} but {} positions",
                    positions.len()
                )));
            }
            self.positions.extend_from_slice(positions);
        }

        self.docs.push(doc);
        self.freqs.push(freq);
        self.last_doc_id = Some(doc);
        self.doc_freq += 1;
        self.ctf += freq as u64;

        if self.docs.len() == self.chunk_size {
            self.flush_chunk();
        }
        Ok(())
    }

    /// Append an already encoded chunk whose documents run from
    /// `first_doc_id` to `last_doc_id`. Only the payload prefix is rewritten.
    /// The chunk's occurrences are not added to the ctf; see
    /// [`PostingEncoder::add_ctf`].
    pub fn push_chunk(
        &mut self,
        doc_payload: &[u8],
        pos_payload: &[u8],
        doc_count: u32,
        first_doc_id: DocId,
        last_doc_id: DocId,
    ) -> Result<()> {
        if let Some(last) = self.last_doc_id
            && first_doc_id <= last
        {
            return Err(BarrelError::invalid_argument(format!(
                "chunk starting at doc {first_doc_id} pushed after doc {last}"
            )));
        }
        self.flush_chunk();

        let doc_start = self.doc_payload.len();
        rebase_chunk(
            doc_payload,
            first_doc_id,
            self.prev_last_doc_id,
            &mut self.doc_payload,
        )?;
        let pos_bytes = if self.with_positions {
            self.pos_payload.extend_from_slice(pos_payload);
            pos_payload.len() as u32
        } else {
            0
        };

        self.end_chunk(ChunkHeader {
            last_doc_id,
            doc_bytes: (self.doc_payload.len() - doc_start) as u32,
            pos_bytes,
        });
        self.last_doc_id = Some(last_doc_id);
        self.doc_freq += doc_count;
        Ok(())
    }

    /// Account for occurrences of chunks appended with
    /// [`PostingEncoder::push_chunk`].
    pub fn add_ctf(&mut self, occurrences: u64) {
        self.ctf += occurrences;
    }

    fn flush_chunk(&mut self) {
        if self.docs.is_empty() {
            return;
        }

        let doc_start = self.doc_payload.len();
        encode_chunk(
            self.codec,
            self.prev_last_doc_id,
            &self.docs,
            &self.freqs,
            &mut self.doc_payload,
        );
        let pos_start = self.pos_payload.len();
        if self.with_positions {
            encode_positions(&self.freqs, &self.positions, &mut self.pos_payload);
        }

        let last_doc_id = self.docs[self.docs.len() - 1];
        self.end_chunk(ChunkHeader {
            last_doc_id,
            doc_bytes: (self.doc_payload.len() - doc_start) as u32,
            pos_bytes: (self.pos_payload.len() - pos_start) as u32,
        });

        self.docs.clear();
        self.freqs.clear();
        self.positions.clear();
    }

    fn end_chunk(&mut self, header: ChunkHeader) {
        header.encode(&mut self.header);
        self.prev_last_doc_id = header.last_doc_id;
        self.chunk_ends.push(SkipEntry {
            last_doc_id: header.last_doc_id,
            chunk_index: self.chunk_ends.len() as u32 + 1,
            header_offset: self.header.len() as u32,
            doc_offset: self.doc_payload.len() as u64,
            position_offset: self.pos_payload.len() as u64,
        });
    }

    /// Write the current term's posting and reset for the next term.
    /// Returns `None`, writing nothing, if no document was added.
    pub fn finish(
        &mut self,
        dfp: &mut dyn StorageOutput,
        pop: &mut dyn StorageOutput,
    ) -> Result<Option<TermInfo>> {
        self.flush_chunk();
        if self.doc_freq == 0 {
            self.reset();
            return Ok(None);
        }

        let skip = SkipList::build(&self.chunk_ends, self.skip_interval, self.max_skip_level);
        let mut skip_bytes = Vec::new();
        skip.encode(&mut skip_bytes);

        let descriptor = PostingDescriptor {
            doc_freq: self.doc_freq,
            ctf: self.ctf,
            position_offset: pop.position(),
            position_length: self.pos_payload.len() as u64,
            chunk_count: self.chunk_ends.len() as u32,
            last_doc_id: self.prev_last_doc_id,
            header_length: self.header.len() as u32,
            skip_length: skip_bytes.len() as u32,
        };
        let mut head = Vec::with_capacity(PostingDescriptor::MAX_LEN);
        descriptor.encode(&mut head);

        let posting_offset = dfp.position();
        dfp.write_all(&head)?;
        dfp.write_all(&self.header)?;
        dfp.write_all(&skip_bytes)?;
        dfp.write_all(&self.doc_payload)?;
        pop.write_all(&self.pos_payload)?;

        let info = TermInfo {
            doc_freq: self.doc_freq,
            ctf: self.ctf,
            posting_offset,
            posting_length: dfp.position() - posting_offset,
            position_length: self.pos_payload.len() as u64,
        };
        self.reset();
        Ok(Some(info))
    }

    /// Discard the current term.
    pub fn reset(&mut self) {
        self.docs.clear();
        self.freqs.clear();
        self.positions.clear();
        self.header.clear();
        self.chunk_ends.clear();
        self.doc_payload.clear();
        self.pos_payload.clear();
        self.prev_last_doc_id = 0;
        self.last_doc_id = None;
        self.doc_freq = 0;
        self.ctf = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, Storage};

    #[test]
    fn test_finish_layout() {
        let storage = MemoryStorage::new();
        let mut dfp = storage.create_output("t.dfp").unwrap();
        let mut pop = storage.create_output("t.pop").unwrap();

        let config = PostingConfig {
            chunk_size: 2,
            ..PostingConfig::default()
        };
        let mut encoder = PostingEncoder::new(&config, Codec::VByte, true);
        encoder.push(1, 2, &[0, 4]).unwrap();
        encoder.push(5, 1, &[3]).unwrap();
        encoder.push(9, 3, &[1, 2, 8]).unwrap();
        let info = encoder.finish(dfp.as_mut(), pop.as_mut()).unwrap().unwrap();
        dfp.close().unwrap();
        pop.close().unwrap();

        assert_eq!(info.doc_freq, 3);
        assert_eq!(info.ctf, 6);
        assert_eq!(info.posting_offset, 0);
        assert_eq!(info.posting_length, storage.file_size("t.dfp").unwrap());
        assert_eq!(info.position_length, storage.file_size("t.pop").unwrap());

        let bytes = storage.file_bytes("t.dfp").unwrap();
        let mut view = ByteView::new(&bytes);
        let descriptor = PostingDescriptor::decode(&mut view).unwrap();
        assert_eq!(descriptor.chunk_count, 2);
        assert_eq!(descriptor.last_doc_id, 9);
        assert_eq!(descriptor.skip_length, 0);
        assert_eq!(descriptor.position_offset, 0);
    }

    #[test]
    fn test_push_validation() {
        let mut encoder = PostingEncoder::new(&PostingConfig::default(), Codec::BitPacked, true);
        encoder.push(3, 1, &[0]).unwrap();
        assert!(encoder.push(3, 1, &[0]).is_err());
        assert!(encoder.push(4, 2, &[0]).is_err());
        assert!(encoder.push(4, 0, &[]).is_err());
        assert_eq!(encoder.doc_freq(), 1);
    }

    #[test]
    fn test_empty_term_writes_nothing() {
        let storage = MemoryStorage::new();
        let mut dfp = storage.create_output("t.dfp").unwrap();
        let mut pop = storage.create_output("t.pop").unwrap();
        let mut encoder = PostingEncoder::new(&PostingConfig::default(), Codec::BitPacked, false);
        assert!(encoder.finish(dfp.as_mut(), pop.as_mut()).unwrap().is_none());
        assert_eq!(dfp.position(), 0);
    }

    #[test]
    fn test_descriptor_rejects_empty_posting() {
        let mut bytes = Vec::new();
        PostingDescriptor::default().encode(&mut bytes);
        let mut view = ByteView::new(&bytes);
        assert!(PostingDescriptor::decode(&mut view).unwrap_err().is_corruption());
    }
}
