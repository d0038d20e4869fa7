//! K-way merge of one field across barrels.

use std::cmp::Ordering;

use crate::barrel::field::FieldInfo;
use crate::barrel::reader::DiskTermIterator;
use crate::barrel::term::TermIterator;
use crate::barrel::writer::BarrelWriter;
use crate::bitset::Bitset;
use crate::config::MergeStrategy;
use crate::error::{BarrelError, Result};
use crate::merger::MergeStats;
use crate::merger::queue::MergeQueue;
use crate::posting::{ChunkDecoder, DiskPostingReader, PostingEncoder, PostingReader};
use crate::types::{DocId, Position};

/// One barrel's terms of the field being merged.
#[derive(Debug)]
pub struct FieldInput {
    pub terms: DiskTermIterator,
    /// First doc id of the barrel, before `doc_offset` is applied.
    pub base_doc_id: DocId,
    /// Added to every doc id read from the barrel.
    pub doc_offset: DocId,
}

#[derive(Debug)]
struct FieldCursor {
    input: FieldInput,
    order: usize,
}

impl FieldCursor {
    fn term(&self) -> &str {
        self.input.terms.term().unwrap_or_default()
    }

    fn first_doc(&self) -> DocId {
        self.input.base_doc_id.saturating_add(self.input.doc_offset)
    }
}

impl Ord for FieldCursor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.term()
            .as_bytes()
            .cmp(other.term().as_bytes())
            .then_with(|| self.first_doc().cmp(&other.first_doc()))
            .then_with(|| self.order.cmp(&other.order))
    }
}

impl PartialOrd for FieldCursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for FieldCursor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FieldCursor {}

/// The posting of the current term in one input.
struct TermSource {
    reader: DiskPostingReader,
    first_doc: DocId,
    offset: DocId,
}

impl TermSource {
    fn last_doc(&self) -> DocId {
        self.reader
            .descriptor()
            .last_doc_id
            .saturating_add(self.offset)
    }
}

fn shift(doc: DocId, offset: DocId) -> Result<DocId> {
    doc.checked_add(offset)
        .ok_or_else(|| BarrelError::invalid_argument(format!("doc {doc} + offset {offset} overflows")))
}

fn is_deleted(deleted: Option<&Bitset>, doc: DocId) -> bool {
    deleted.is_some_and(|d| d.test(doc as usize))
}

/// Merges the terms of one field. Reusable across fields.
#[derive(Debug)]
pub struct FieldMerger<'a> {
    strategy: MergeStrategy,
    deleted: Option<&'a Bitset>,
    decoder: ChunkDecoder,
    sort_buffer: Vec<(DocId, u32, Vec<Position>)>,
}

impl<'a> FieldMerger<'a> {
    /// `deleted` is indexed by output doc ids, offsets applied.
    pub fn new(strategy: MergeStrategy, deleted: Option<&'a Bitset>) -> Self {
        FieldMerger {
            strategy,
            deleted: deleted.filter(|d| d.any()),
            decoder: ChunkDecoder::new(),
            sort_buffer: Vec::new(),
        }
    }

    /// Write `output` to `writer`, merging the terms of every input.
    pub fn merge(
        &mut self,
        writer: &mut BarrelWriter,
        output: &FieldInfo,
        inputs: Vec<FieldInput>,
        stats: &mut MergeStats,
    ) -> Result<()> {
        writer.start_field(output.clone())?;

        let cursors = inputs
            .into_iter()
            .enumerate()
            .map(|(order, input)| FieldCursor { input, order })
            .collect();
        let mut queue = MergeQueue::new(cursors);
        for idx in 0..queue.items().len() {
            if queue.get_mut(idx).input.terms.advance()? {
                queue.push(idx);
            }
        }

        let mut group = Vec::new();
        while let Some(first) = queue.pop() {
            group.clear();
            group.push(first);
            let term = queue.get(first).term().to_string();
            while let Some(next) = queue.peek()
                && queue.get(next).term() == term
            {
                queue.pop();
                group.push(next);
            }

            self.merge_term(writer, &term, &queue, &group, stats)?;

            for &idx in &group {
                if queue.get_mut(idx).input.terms.advance()? {
                    queue.push(idx);
                }
            }
        }
        log::debug!(
            "merged field {}: {} terms written so far",
            output.name,
            stats.terms_written
        );
        Ok(())
    }

    fn merge_term(
        &mut self,
        writer: &mut BarrelWriter,
        term: &str,
        queue: &MergeQueue<FieldCursor>,
        group: &[usize],
        stats: &mut MergeStats,
    ) -> Result<()> {
        let mut sources = group
            .iter()
            .map(|&idx| {
                let cursor = queue.get(idx);
                let reader = cursor
                    .input
                    .terms
                    .raw_postings()?
                    .ok_or_else(|| BarrelError::index("merge cursor is not on a term"))?;
                Ok(TermSource {
                    reader,
                    first_doc: cursor.first_doc(),
                    offset: cursor.input.doc_offset,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let ordered = sources
            .windows(2)
            .all(|pair| pair[0].last_doc() < pair[1].first_doc);
        let strategy = match self.strategy {
            MergeStrategy::Auto if ordered => MergeStrategy::Streaming,
            MergeStrategy::Auto => MergeStrategy::Sorting,
            MergeStrategy::Streaming if !ordered => {
                return Err(BarrelError::index(format!(
                    "term {term:?}: inputs overlap in doc ids, streaming merge is not possible"
                )));
            }
            strategy => strategy,
        };

        let deleted = self.deleted;
        let decoder = &mut self.decoder;
        let buffer = &mut self.sort_buffer;
        let written = match strategy {
            MergeStrategy::Sorting => {
                stats.terms_sorted += 1;
                writer.write_term(term, |encoder| {
                    sort_term(encoder, &mut sources, deleted, buffer, stats)
                })?
            }
            _ => {
                stats.terms_streamed += 1;
                writer.write_term(term, |encoder| {
                    stream_term(encoder, &mut sources, deleted, decoder, stats)
                })?
            }
        };
        match written {
            Some(_) => stats.terms_written += 1,
            None => stats.terms_dropped += 1,
        }
        Ok(())
    }
}

/// Concatenate the inputs, copying clean chunks as stored.
fn stream_term(
    encoder: &mut PostingEncoder,
    sources: &mut [TermSource],
    deleted: Option<&Bitset>,
    decoder: &mut ChunkDecoder,
    stats: &mut MergeStats,
) -> Result<()> {
    for source in sources.iter_mut() {
        let codec = source.reader.codec();
        let has_positions = source.reader.has_positions();
        let copyable = codec == encoder.codec() && (has_positions || !encoder.with_positions());
        // Occurrences of the chunks decoded below, deleted documents included.
        let mut decoded_ctf = 0u64;

        while let Some(raw) = source.reader.next_raw_chunk()? {
            let first = shift(raw.first_doc_id, source.offset)?;
            let last = shift(raw.last_doc_id, source.offset)?;
            let clean = deleted.is_none_or(|d| d.count_range(first as usize, last as usize + 1) == 0);
            if copyable && clean {
                encoder.push_chunk(&raw.doc_payload, &raw.pos_payload, raw.doc_count, first, last)?;
                stats.chunks_copied += 1;
                stats.postings_written += raw.doc_count as u64;
                continue;
            }

            decoder.decode_doc_ids(
                codec,
                &raw.doc_payload,
                shift(raw.prev_last_doc_id, source.offset)?,
            )?;
            let positions = has_positions.then_some(raw.pos_payload.as_slice());
            decoder.decode_frequencies(&raw.doc_payload, positions)?;
            decoded_ctf += decoder.freqs().iter().map(|&f| f as u64).sum::<u64>();

            for i in 0..decoder.len() {
                let doc = decoder.doc_ids()[i];
                if is_deleted(deleted, doc) {
                    stats.deleted_postings_removed += 1;
                    continue;
                }
                encoder.push(doc, decoder.freqs()[i], decoder.positions(i))?;
                stats.postings_written += 1;
            }
            stats.chunks_reencoded += 1;
        }

        let copied_ctf = source.reader.ctf().checked_sub(decoded_ctf).ok_or_else(|| {
            BarrelError::corruption("chunk frequencies exceed the term's collection frequency")
        })?;
        encoder.add_ctf(copied_ctf);
    }
    Ok(())
}

/// Decode every input, sort by doc id and re-encode.
fn sort_term(
    encoder: &mut PostingEncoder,
    sources: &mut [TermSource],
    deleted: Option<&Bitset>,
    buffer: &mut Vec<(DocId, u32, Vec<Position>)>,
    stats: &mut MergeStats,
) -> Result<()> {
    buffer.clear();
    let mut docs = [0; 128];
    let mut freqs = [0; 128];
    for source in sources.iter_mut() {
        loop {
            let n = source.reader.decode_next(&mut docs, &mut freqs)?;
            if n == 0 {
                break;
            }
            for i in 0..n {
                let mut positions = Vec::new();
                source.reader.decode_next_positions(&mut positions)?;
                let doc = shift(docs[i], source.offset)?;
                if is_deleted(deleted, doc) {
                    stats.deleted_postings_removed += 1;
                    continue;
                }
                buffer.push((doc, freqs[i], positions));
            }
        }
    }
    buffer.sort_by_key(|entry| entry.0);

    let mut i = 0;
    while i < buffer.len() {
        let doc = buffer[i].0;
        let mut freq = buffer[i].1;
        let mut positions = std::mem::take(&mut buffer[i].2);
        let mut j = i + 1;
        while j < buffer.len() && buffer[j].0 == doc {
            freq += buffer[j].1;
            positions.extend_from_slice(&buffer[j].2);
            j += 1;
        }
        if j > i + 1 {
            positions.sort_unstable();
        }
        encoder.push(doc, freq, &positions)?;
        stats.postings_written += 1;
        i = j;
    }
    Ok(())
}
