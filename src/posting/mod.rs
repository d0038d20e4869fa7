//! Posting lists: the compressed chunk format, the append-only in-memory
//! writer and the two readers.
//!
//! Both tiers implement [`PostingReader`], so callers never need to know
//! whether a posting list still lives in memory or has been flushed:
//!
//! - [`MemPostingReader`] reads a [`MemPostingWriter`] of the barrel that is
//!   being written.
//! - [`DiskPostingReader`] reads a flushed posting from a barrel's `.dfp`
//!   and `.pop` files, optionally through a listing cache.
//!
//! Every reader hands out documents in batches. A batch never spans two
//! chunks of an on-disk posting, so a batch may be shorter than the buffers
//! it was given even before the list is exhausted.

pub mod block;
pub mod chunk;
pub mod disk;
pub mod encoder;
pub mod memory;
pub mod skip;
pub mod writer;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{DocId, Position};

pub use block::{BlockDecoder, ChunkHeader};
pub use chunk::{ChunkDecoder, decode_values, encode_values};
pub use disk::{DiskPostingReader, PostingFile, RawChunk};
pub use encoder::{EncodedPosting, PostingEncoder};
pub use memory::MemPostingReader;
pub use skip::{SkipEntry, SkipList};
pub use writer::MemPostingWriter;

/// Per-term statistics and the location of its posting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermInfo {
    /// Number of documents containing the term.
    pub doc_freq: u32,
    /// Total occurrences of the term (collection term frequency).
    pub ctf: u64,
    /// Offset of the posting in the `.dfp` file.
    pub posting_offset: u64,
    /// Bytes of the posting in the `.dfp` file.
    pub posting_length: u64,
    /// Bytes of the term's positions in the `.pop` file.
    pub position_length: u64,
}

/// Result of [`PostingReader::decode_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeTo {
    /// Number of postings written to the buffers.
    pub count: usize,
    /// Index in the buffers of the first document `>=` the target.
    pub cursor: usize,
    /// Last doc id written to the buffers.
    pub last_doc_id: DocId,
}

/// Sequential access to one term's posting list.
pub trait PostingReader: Send {
    /// Number of documents in the posting list.
    fn doc_freq(&self) -> u32;

    /// Total occurrences of the term.
    fn ctf(&self) -> u64;

    /// Highest doc id of the posting list, if it is not empty.
    fn last_doc_id(&self) -> Option<DocId>;

    /// Frequency of the document whose positions are returned next.
    fn cur_tf(&self) -> u32;

    /// Decode the next batch of postings. Returns 0 once the list is
    /// exhausted.
    fn decode_next(&mut self, docs: &mut [DocId], freqs: &mut [u32]) -> Result<usize>;

    /// Skip to the first document `>= target` and decode a batch around it.
    ///
    /// The batch starts at the first undelivered document of the window that
    /// contains the target; [`DecodeTo::cursor`] points at the target inside
    /// it. Returns `None` if no such document exists.
    fn decode_to(
        &mut self,
        target: DocId,
        docs: &mut [DocId],
        freqs: &mut [u32],
    ) -> Result<Option<DecodeTo>>;

    /// Replace `out` with the positions of the next document of the current
    /// batch and return how many there are. Returns 0 when the batch has no
    /// more documents.
    fn decode_next_positions(&mut self, out: &mut Vec<Position>) -> Result<usize>;

    /// Rewind the position cursor to the start of the current batch.
    fn reset_position(&mut self);
}

/// Drain a posting reader into `(doc, freq)` pairs.
pub fn collect_postings(reader: &mut dyn PostingReader) -> Result<Vec<(DocId, u32)>> {
    let mut docs = [0; 128];
    let mut freqs = [0; 128];
    let mut out = Vec::with_capacity(reader.doc_freq() as usize);
    loop {
        let n = reader.decode_next(&mut docs, &mut freqs)?;
        if n == 0 {
            return Ok(out);
        }
        out.extend(docs[..n].iter().copied().zip(freqs[..n].iter().copied()));
    }
}

/// Drain a posting reader into `(doc, positions)` pairs.
pub fn collect_positions(reader: &mut dyn PostingReader) -> Result<Vec<(DocId, Vec<Position>)>> {
    let mut docs = [0; 128];
    let mut freqs = [0; 128];
    let mut positions = Vec::new();
    let mut out = Vec::with_capacity(reader.doc_freq() as usize);
    loop {
        let n = reader.decode_next(&mut docs, &mut freqs)?;
        if n == 0 {
            return Ok(out);
        }
        for &doc in &docs[..n] {
            reader.decode_next_positions(&mut positions)?;
            out.push((doc, positions.clone()));
        }
    }
}
