//! Chunk encoding and decoding.
//!
//! A chunk holds up to `chunk_size` postings of one term. Its doc payload is
//!
//! ```text
//! vu32 doc_count
//! vu32 first_delta        first doc id minus the previous chunk's last id
//! codec(deltas[1..n])     gaps between consecutive doc ids
//! codec(freqs[0..n] - 1)
//! ```
//!
//! and its position payload stores, for every document in order, the
//! vu32-encoded gaps between its positions, restarting from zero.

use crate::bitset::Bitset;
use crate::config::Codec;
use crate::error::{BarrelError, Result};
use crate::storage::ByteView;
use crate::types::{DocId, Position};
use crate::util::{bitpacking, varint};

/// Upper bound on the documents of one chunk.
pub const MAX_CHUNK_DOCS: usize = 1 << 16;

/// Append `values` encoded with `codec`.
pub fn encode_values(codec: Codec, values: &[u32], out: &mut Vec<u8>) {
    match codec {
        Codec::VByte => {
            for &value in values {
                varint::put_u32(out, value);
            }
        }
        Codec::BitPacked => bitpacking::pack(values, out),
    }
}

/// Decode `out.len()` values encoded with `codec`; returns bytes consumed.
pub fn decode_values(codec: Codec, input: &[u8], out: &mut [u32]) -> Result<usize> {
    match codec {
        Codec::VByte => {
            let mut offset = 0;
            for value in out.iter_mut() {
                let (decoded, read) = varint::decode_u32(&input[offset..])?;
                *value = decoded;
                offset += read;
            }
            Ok(offset)
        }
        Codec::BitPacked => bitpacking::unpack(input, out),
    }
}

/// Append the doc payload of one chunk.
pub fn encode_chunk(
    codec: Codec,
    prev_last_doc_id: DocId,
    docs: &[DocId],
    freqs: &[u32],
    out: &mut Vec<u8>,
) {
    debug_assert_eq!(docs.len(), freqs.len());
    debug_assert!(!docs.is_empty());

    varint::put_u32(out, docs.len() as u32);
    varint::put_u32(out, docs[0] - prev_last_doc_id);

    let deltas: Vec<u32> = docs.windows(2).map(|w| w[1] - w[0]).collect();
    encode_values(codec, &deltas, out);

    let freqs_minus_one: Vec<u32> = freqs.iter().map(|&f| f.saturating_sub(1)).collect();
    encode_values(codec, &freqs_minus_one, out);
}

/// Append the position payload of one chunk. `positions` holds the
/// positions of every document back to back, `freqs[i]` of them for
/// document `i`.
pub fn encode_positions(freqs: &[u32], positions: &[Position], out: &mut Vec<u8>) {
    let mut offset = 0;
    for &freq in freqs {
        let mut prev = 0;
        for &pos in &positions[offset..offset + freq as usize] {
            varint::put_u32(out, pos - prev);
            prev = pos;
        }
        offset += freq as usize;
    }
}

/// The `doc_count` and `first_delta` prefix of a doc payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPrefix {
    pub doc_count: u32,
    pub first_delta: u32,
    /// Bytes occupied by the prefix.
    pub len: usize,
}

/// Parse the prefix of a doc payload.
pub fn read_prefix(payload: &[u8]) -> Result<ChunkPrefix> {
    let mut view = ByteView::new(payload);
    let doc_count = view.read_vu32()?;
    let first_delta = view.read_vu32()?;
    if doc_count == 0 || doc_count as usize > MAX_CHUNK_DOCS {
        return Err(BarrelError::corruption(format!(
            "invalid chunk document count {doc_count}"
        )));
    }
    Ok(ChunkPrefix {
        doc_count,
        first_delta,
        len: view.offset(),
    })
}

/// Rewrite a doc payload so that it decodes relative to a new previous
/// doc id. The encoded gaps and frequencies are copied unchanged.
pub fn rebase_chunk(
    payload: &[u8],
    first_doc_id: DocId,
    new_prev_last_doc_id: DocId,
    out: &mut Vec<u8>,
) -> Result<()> {
    let prefix = read_prefix(payload)?;
    if first_doc_id < new_prev_last_doc_id {
        return Err(BarrelError::invalid_argument(format!(
            "chunk starting at {first_doc_id} cannot follow doc {new_prev_last_doc_id}"
        )));
    }
    varint::put_u32(out, prefix.doc_count);
    varint::put_u32(out, first_doc_id - new_prev_last_doc_id);
    out.extend_from_slice(&payload[prefix.len..]);
    Ok(())
}

/// Decoded state of one chunk.
///
/// Doc ids are decoded first; frequencies and positions only when asked
/// for. [`ChunkDecoder::post_process`] may drop documents at any point,
/// later decodes only produce values for the documents that remain.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    codec: Option<Codec>,
    doc_ids: Vec<DocId>,
    freqs: Vec<u32>,
    /// Index of each remaining document in the encoded chunk.
    origin: Vec<u32>,
    all_freqs: Vec<u32>,
    positions: Vec<Position>,
    /// Start and length in `positions` of every encoded document.
    pos_ranges: Vec<(u32, u32)>,
    /// Documents in the encoded chunk, deleted ones included.
    encoded_count: usize,
    freq_offset: usize,
    freqs_decoded: bool,
    positions_decoded: bool,
    cursor: usize,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the doc ids of `payload`, continuing from the previous
    /// chunk's last doc id. Resets all other state.
    pub fn decode_doc_ids(
        &mut self,
        codec: Codec,
        payload: &[u8],
        prev_last_doc_id: DocId,
    ) -> Result<()> {
        let prefix = read_prefix(payload)?;
        let n = prefix.doc_count as usize;

        self.codec = Some(codec);
        self.doc_ids.clear();
        self.doc_ids.resize(n, 0);
        let used = decode_values(codec, &payload[prefix.len..], &mut self.doc_ids[1..])?;

        // Inverse prefix sum.
        let mut doc = prev_last_doc_id
            .checked_add(prefix.first_delta)
            .ok_or_else(|| BarrelError::corruption("doc id overflow in chunk"))?;
        self.doc_ids[0] = doc;
        for i in 1..n {
            let delta = self.doc_ids[i];
            if delta == 0 {
                return Err(BarrelError::corruption("non-increasing doc ids in chunk"));
            }
            doc = doc
                .checked_add(delta)
                .ok_or_else(|| BarrelError::corruption("doc id overflow in chunk"))?;
            self.doc_ids[i] = doc;
        }

        self.origin.clear();
        self.origin.extend(0..n as u32);
        self.encoded_count = n;
        self.freq_offset = prefix.len + used;
        self.freqs.clear();
        self.all_freqs.clear();
        self.positions.clear();
        self.pos_ranges.clear();
        self.freqs_decoded = false;
        self.positions_decoded = false;
        self.cursor = 0;
        Ok(())
    }

    /// Decode frequencies from the same payload given to
    /// [`ChunkDecoder::decode_doc_ids`], and positions too if a position
    /// payload is supplied.
    pub fn decode_frequencies(&mut self, payload: &[u8], positions: Option<&[u8]>) -> Result<()> {
        if !self.freqs_decoded {
            let codec = self
                .codec
                .ok_or_else(|| BarrelError::index("chunk doc ids are not decoded"))?;
            let input = payload
                .get(self.freq_offset..)
                .ok_or_else(|| BarrelError::corruption("chunk frequencies out of range"))?;

            self.all_freqs.resize(self.encoded_count, 0);
            decode_values(codec, input, &mut self.all_freqs)?;
            for freq in self.all_freqs.iter_mut() {
                *freq += 1;
            }
            self.freqs.clear();
            self.freqs
                .extend(self.origin.iter().map(|&i| self.all_freqs[i as usize]));
            self.freqs_decoded = true;
        }

        if let Some(pos_payload) = positions {
            self.decode_positions(pos_payload)?;
        }
        Ok(())
    }

    /// Decode the position payload of the chunk. Frequencies must be
    /// decoded first.
    pub fn decode_positions(&mut self, pos_payload: &[u8]) -> Result<()> {
        if self.positions_decoded {
            return Ok(());
        }
        if !self.freqs_decoded {
            return Err(BarrelError::index(
                "chunk frequencies must be decoded before positions",
            ));
        }

        self.positions.clear();
        self.pos_ranges.clear();
        let mut view = ByteView::new(pos_payload);
        for &freq in &self.all_freqs {
            let start = self.positions.len() as u32;
            let mut pos: Position = 0;
            for _ in 0..freq {
                pos = pos
                    .checked_add(view.read_vu32()?)
                    .ok_or_else(|| BarrelError::corruption("position overflow"))?;
                self.positions.push(pos);
            }
            self.pos_ranges.push((start, freq));
        }
        if view.remaining() != 0 {
            return Err(BarrelError::corruption(format!(
                "{} stray bytes after chunk positions",
                view.remaining()
            )));
        }
        self.positions_decoded = true;
        Ok(())
    }

    /// Advance the cursor to the first document `>= target`, decoding
    /// positions on the way when `pos_payload` is given. Returns the index
    /// of that document, or `None` if the chunk has none.
    pub fn move_to(
        &mut self,
        target: DocId,
        payload: &[u8],
        pos_payload: Option<&[u8]>,
    ) -> Result<Option<usize>> {
        while self.cursor < self.doc_ids.len() && self.doc_ids[self.cursor] < target {
            self.cursor += 1;
        }
        if self.cursor == self.doc_ids.len() {
            return Ok(None);
        }
        self.decode_frequencies(payload, pos_payload)?;
        Ok(Some(self.cursor))
    }

    /// Drop every document set in `deleted`. Applying the same filter again
    /// changes nothing.
    pub fn post_process(&mut self, deleted: &Bitset) {
        if deleted.none() {
            return;
        }

        let mut write = 0;
        let mut cursor = self.cursor;
        for read in 0..self.doc_ids.len() {
            if deleted.test(self.doc_ids[read] as usize) {
                if read < self.cursor {
                    cursor -= 1;
                }
                continue;
            }
            self.doc_ids[write] = self.doc_ids[read];
            self.origin[write] = self.origin[read];
            if self.freqs_decoded {
                self.freqs[write] = self.freqs[read];
            }
            write += 1;
        }
        self.doc_ids.truncate(write);
        self.origin.truncate(write);
        if self.freqs_decoded {
            self.freqs.truncate(write);
        }
        self.cursor = cursor;
    }

    /// Remaining documents.
    pub fn len(&self) -> usize {
        self.doc_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
    }

    pub fn doc_ids(&self) -> &[DocId] {
        &self.doc_ids
    }

    /// Frequencies of the remaining documents; empty until decoded.
    pub fn freqs(&self) -> &[u32] {
        &self.freqs
    }

    pub fn freqs_decoded(&self) -> bool {
        self.freqs_decoded
    }

    pub fn positions_decoded(&self) -> bool {
        self.positions_decoded
    }

    /// Positions of the remaining document at `idx`; empty until decoded.
    pub fn positions(&self, idx: usize) -> &[Position] {
        if !self.positions_decoded {
            return &[];
        }
        let (start, len) = self.pos_ranges[self.origin[idx] as usize];
        &self.positions[start as usize..(start + len) as usize]
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor.min(self.doc_ids.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(codec: Codec, prev: DocId, docs: &[DocId], freqs: &[u32]) -> Vec<u8> {
        let mut out = Vec::new();
        encode_chunk(codec, prev, docs, freqs, &mut out);
        out
    }

    #[test]
    fn test_decode_doc_ids_and_freqs() {
        for codec in [Codec::VByte, Codec::BitPacked] {
            let payload = encode(codec, 0, &[1, 5, 9], &[2, 1, 3]);
            let mut decoder = ChunkDecoder::new();
            decoder.decode_doc_ids(codec, &payload, 0).unwrap();
            assert_eq!(decoder.doc_ids(), &[1, 5, 9]);
            assert!(decoder.freqs().is_empty());

            decoder.decode_frequencies(&payload, None).unwrap();
            assert_eq!(decoder.freqs(), &[2, 1, 3]);
        }
    }

    #[test]
    fn test_carries_previous_last_doc_id() {
        let payload = encode(Codec::BitPacked, 100, &[103, 104, 200], &[1, 1, 1]);
        let mut decoder = ChunkDecoder::new();
        decoder.decode_doc_ids(Codec::BitPacked, &payload, 100).unwrap();
        assert_eq!(decoder.doc_ids(), &[103, 104, 200]);
    }

    #[test]
    fn test_positions_restart_per_document() {
        let freqs = [2, 1, 3];
        let positions = [4, 9, 0, 1, 2, 30];
        let mut pos_payload = Vec::new();
        encode_positions(&freqs, &positions, &mut pos_payload);

        let payload = encode(Codec::VByte, 0, &[1, 5, 9], &freqs);
        let mut decoder = ChunkDecoder::new();
        decoder.decode_doc_ids(Codec::VByte, &payload, 0).unwrap();
        decoder.decode_frequencies(&payload, Some(&pos_payload)).unwrap();

        assert_eq!(decoder.positions(0), &[4, 9]);
        assert_eq!(decoder.positions(1), &[0]);
        assert_eq!(decoder.positions(2), &[1, 2, 30]);
    }

    #[test]
    fn test_move_to() {
        let payload = encode(Codec::BitPacked, 0, &[2, 4, 8, 16], &[1, 2, 3, 4]);
        let mut decoder = ChunkDecoder::new();
        decoder.decode_doc_ids(Codec::BitPacked, &payload, 0).unwrap();

        assert_eq!(decoder.move_to(5, &payload, None).unwrap(), Some(2));
        assert_eq!(decoder.freqs()[decoder.cursor()], 3);
        assert_eq!(decoder.move_to(8, &payload, None).unwrap(), Some(2));
        assert_eq!(decoder.move_to(17, &payload, None).unwrap(), None);
        assert_eq!(decoder.cursor(), 4);
    }

    #[test]
    fn test_post_process_is_idempotent() {
        let freqs = [1, 2, 1, 1];
        let positions = [7, 1, 2, 3, 5];
        let mut pos_payload = Vec::new();
        encode_positions(&freqs, &positions, &mut pos_payload);
        let payload = encode(Codec::BitPacked, 0, &[3, 5, 6, 10], &freqs);

        let deleted = Bitset::from_positions([5, 10]).unwrap();
        let mut decoder = ChunkDecoder::new();
        decoder.decode_doc_ids(Codec::BitPacked, &payload, 0).unwrap();
        decoder.post_process(&deleted);
        decoder.post_process(&deleted);
        assert_eq!(decoder.doc_ids(), &[3, 6]);

        // Frequencies and positions decoded after filtering line up with
        // the remaining documents.
        decoder.decode_frequencies(&payload, Some(&pos_payload)).unwrap();
        assert_eq!(decoder.freqs(), &[1, 1]);
        assert_eq!(decoder.positions(0), &[7]);
        assert_eq!(decoder.positions(1), &[3]);
    }

    #[test]
    fn test_post_process_after_frequencies_keeps_cursor() {
        let payload = encode(Codec::VByte, 0, &[1, 2, 3, 4], &[4, 3, 2, 1]);
        let mut decoder = ChunkDecoder::new();
        decoder.decode_doc_ids(Codec::VByte, &payload, 0).unwrap();
        decoder.decode_frequencies(&payload, None).unwrap();
        decoder.set_cursor(2);

        decoder.post_process(&Bitset::from_positions([1, 4]).unwrap());
        assert_eq!(decoder.doc_ids(), &[2, 3]);
        assert_eq!(decoder.freqs(), &[3, 2]);
        assert_eq!(decoder.doc_ids()[decoder.cursor()], 3);
    }

    #[test]
    fn test_rebase_chunk() {
        let payload = encode(Codec::BitPacked, 0, &[2, 3, 7], &[1, 1, 2]);
        let mut rebased = Vec::new();
        rebase_chunk(&payload, 102, 50, &mut rebased).unwrap();

        let mut decoder = ChunkDecoder::new();
        decoder.decode_doc_ids(Codec::BitPacked, &rebased, 50).unwrap();
        decoder.decode_frequencies(&rebased, None).unwrap();
        assert_eq!(decoder.doc_ids(), &[102, 103, 107]);
        assert_eq!(decoder.freqs(), &[1, 1, 2]);

        assert!(rebase_chunk(&payload, 10, 11, &mut Vec::new()).is_err());
    }

    #[test]
    fn test_truncated_payload_is_corruption() {
        let payload = encode(Codec::BitPacked, 0, &[1, 300, 70000], &[1, 9, 2]);
        let mut decoder = ChunkDecoder::new();
        let err = decoder
            .decode_doc_ids(Codec::BitPacked, &payload[..3], 0)
            .unwrap_err();
        assert!(err.is_corruption());
    }
}
