//! Reader over a flushed posting.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::bitset::Bitset;
use crate::cache::{BlockSource, FileId, ListingCache};
use crate::config::Codec;
use crate::error::{BarrelError, Result};
use crate::posting::block::{BlockDecoder, ChunkLocation};
use crate::posting::chunk::{ChunkDecoder, read_prefix};
use crate::posting::encoder::PostingDescriptor;
use crate::posting::skip::SkipList;
use crate::posting::{DecodeTo, PostingReader, TermInfo};
use crate::storage::{ByteView, Storage, StorageInput};
use crate::types::{DocId, Position};

/// A barrel's posting or position file, shared by every reader of the
/// barrel. Reads go through the listing cache when one is attached; the
/// file registers itself with that cache on open.
#[derive(Debug)]
pub struct PostingFile {
    name: String,
    size: u64,
    input: Mutex<Box<dyn StorageInput>>,
    cache: Option<(Arc<ListingCache>, FileId)>,
}

impl PostingFile {
    pub fn open(
        storage: &dyn Storage,
        name: &str,
        cache: Option<Arc<ListingCache>>,
    ) -> Result<Self> {
        let input = storage.open_input(name)?;
        let size = input.size()?;
        Ok(PostingFile {
            name: name.to_string(),
            size,
            input: Mutex::new(input),
            cache: cache.map(|cache| {
                let file = cache.register_file();
                (cache, file)
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn cache(&self) -> Option<&Arc<ListingCache>> {
        self.cache.as_ref().map(|(cache, _)| cache)
    }

    /// Read `len` bytes at `offset`.
    pub fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        if offset.checked_add(len as u64).is_none_or(|end| end > self.size) {
            return Err(BarrelError::corruption(format!(
                "{}: read of {len} bytes at {offset} beyond end of file ({} bytes)",
                self.name, self.size
            )));
        }
        if len == 0 {
            return Ok(Vec::new());
        }
        match &self.cache {
            Some((cache, file)) => self.read_cached(cache, *file, offset, len),
            None => self.read_direct(offset, len),
        }
    }

    fn read_direct(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.input.lock().read_at(offset, &mut buf)?;
        Ok(buf)
    }

    fn read_cached(
        &self,
        cache: &ListingCache,
        file: FileId,
        offset: u64,
        len: usize,
    ) -> Result<Vec<u8>> {
        let block_size = cache.block_size() as u64;
        let end_offset = offset + len as u64;
        let start = offset / block_size;
        let end = (end_offset - 1) / block_size + 1;

        if end - start > cache.capacity() as u64 || !cache.apply_blocks(file, start, end) {
            log::warn!(
                "listing cache of {} cannot admit blocks {start}..{end}, reading directly",
                self.name
            );
            return self.read_direct(offset, len);
        }

        let result = (|| {
            let mut out = Vec::with_capacity(len);
            for block in start..end {
                let data = cache.get_block(self, file, block)?;
                let block_start = block * block_size;
                let from = (offset.max(block_start) - block_start) as usize;
                let to = (end_offset.min(block_start + block_size) - block_start) as usize;
                let slice = data.get(from..to).ok_or_else(|| {
                    BarrelError::corruption(format!(
                        "{}: cached block {block} is shorter than expected",
                        self.name
                    ))
                })?;
                out.extend_from_slice(slice);
            }
            Ok(out)
        })();
        cache.free_blocks(file, start, end);
        result
    }
}

impl BlockSource for PostingFile {
    fn read_block(&self, block: u64, block_size: usize) -> Result<Vec<u8>> {
        let offset = block * block_size as u64;
        if offset >= self.size {
            return Err(BarrelError::corruption(format!(
                "{}: block {block} beyond end of file",
                self.name
            )));
        }
        let len = (self.size - offset).min(block_size as u64) as usize;
        self.read_direct(offset, len)
    }
}

/// One encoded chunk, as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    pub doc_count: u32,
    pub first_doc_id: DocId,
    pub last_doc_id: DocId,
    /// Last doc id of the previous chunk; the payload decodes relative to it.
    pub prev_last_doc_id: DocId,
    pub doc_payload: Vec<u8>,
    pub pos_payload: Vec<u8>,
}

/// Reads one term's posting from a barrel's `.dfp`/`.pop` files.
///
/// Chunks are fetched one at a time as the reader advances;
/// [`PostingReader::decode_to`] uses the skip list to avoid fetching chunks
/// that lie entirely before the target.
#[derive(Debug)]
pub struct DiskPostingReader {
    dfp: Arc<PostingFile>,
    pop: Option<Arc<PostingFile>>,
    codec: Codec,
    descriptor: PostingDescriptor,
    payload_base: u64,
    payload_len: u64,
    block: BlockDecoder,
    skip_bytes: Vec<u8>,
    skip: Option<SkipList>,
    deleted: Option<Arc<Bitset>>,

    chunk: ChunkDecoder,
    chunk_loc: Option<ChunkLocation>,
    doc_payload: Vec<u8>,

    batch_start: usize,
    batch_len: usize,
    pos_cursor: usize,
}

impl DiskPostingReader {
    /// Open the posting described by `info`. `pop` is only consulted for
    /// fields that store positions.
    pub fn open(
        dfp: Arc<PostingFile>,
        pop: Option<Arc<PostingFile>>,
        codec: Codec,
        info: &TermInfo,
    ) -> Result<Self> {
        let head_len = (PostingDescriptor::MAX_LEN as u64).min(info.posting_length) as usize;
        let head = dfp.read_range(info.posting_offset, head_len)?;
        let mut view = ByteView::new(&head);
        let descriptor = PostingDescriptor::decode(&mut view)?;
        let descriptor_len = view.offset() as u64;

        if descriptor.doc_freq != info.doc_freq || descriptor.ctf != info.ctf {
            return Err(BarrelError::corruption(format!(
                "{}: posting at {} disagrees with its term entry",
                dfp.name(),
                info.posting_offset
            )));
        }
        let meta_len = descriptor.header_length as u64 + descriptor.skip_length as u64;
        if descriptor_len + meta_len > info.posting_length {
            return Err(BarrelError::corruption(format!(
                "{}: posting header of {} bytes exceeds posting length {}",
                dfp.name(),
                descriptor_len + meta_len,
                info.posting_length
            )));
        }

        let mut meta = dfp.read_range(info.posting_offset + descriptor_len, meta_len as usize)?;
        let skip_bytes = meta.split_off(descriptor.header_length as usize);
        let payload_base = info.posting_offset + descriptor_len + meta_len;

        let pop = pop.filter(|_| descriptor.position_length > 0);
        Ok(DiskPostingReader {
            block: BlockDecoder::new(meta, descriptor.chunk_count),
            dfp,
            pop,
            codec,
            descriptor,
            payload_base,
            payload_len: info.posting_length - descriptor_len - meta_len,
            skip_bytes,
            skip: None,
            deleted: None,
            chunk: ChunkDecoder::new(),
            chunk_loc: None,
            doc_payload: Vec::new(),
            batch_start: 0,
            batch_len: 0,
            pos_cursor: 0,
        })
    }

    /// Drop documents set in `deleted` while decoding.
    pub fn with_deleted(mut self, deleted: Option<Arc<Bitset>>) -> Self {
        self.deleted = deleted.filter(|d| d.any());
        self
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn has_positions(&self) -> bool {
        self.pop.is_some()
    }

    pub fn descriptor(&self) -> &PostingDescriptor {
        &self.descriptor
    }

    /// Rewind to the first document.
    pub fn rewind(&mut self) {
        self.block.reset();
        self.chunk_loc = None;
        self.clear_batch();
    }

    fn clear_batch(&mut self) {
        self.batch_start = 0;
        self.batch_len = 0;
        self.pos_cursor = 0;
    }

    fn skip_list(&mut self) -> Result<&SkipList> {
        if self.skip.is_none() {
            self.skip = Some(SkipList::decode(&self.skip_bytes)?);
        }
        Ok(self.skip.get_or_insert_with(SkipList::default))
    }

    fn read_doc_payload(&self, loc: &ChunkLocation) -> Result<Vec<u8>> {
        let len = loc.header.doc_bytes as u64;
        if loc.doc_offset + len > self.payload_len {
            return Err(BarrelError::corruption(format!(
                "{}: chunk {} runs past its posting",
                self.dfp.name(),
                loc.index
            )));
        }
        self.dfp
            .read_range(self.payload_base + loc.doc_offset, len as usize)
    }

    fn read_pos_payload(&self, loc: &ChunkLocation) -> Result<Vec<u8>> {
        let Some(pop) = &self.pop else {
            return Ok(Vec::new());
        };
        let len = loc.header.pos_bytes as u64;
        if loc.pos_offset + len > self.descriptor.position_length {
            return Err(BarrelError::corruption(format!(
                "{}: positions of chunk {} run past the term",
                pop.name(),
                loc.index
            )));
        }
        pop.read_range(self.descriptor.position_offset + loc.pos_offset, len as usize)
    }

    fn load_chunk(&mut self, loc: ChunkLocation) -> Result<()> {
        self.doc_payload = self.read_doc_payload(&loc)?;
        self.chunk
            .decode_doc_ids(self.codec, &self.doc_payload, loc.prev_last_doc_id)?;
        if self.chunk.doc_ids().last() != Some(&loc.header.last_doc_id) {
            return Err(BarrelError::corruption(format!(
                "{}: chunk {} does not end at doc {}",
                self.dfp.name(),
                loc.index,
                loc.header.last_doc_id
            )));
        }
        if let Some(deleted) = &self.deleted {
            self.chunk.post_process(deleted);
        }
        self.chunk_loc = Some(loc);
        self.clear_batch();
        Ok(())
    }

    /// Load the next chunk that still has documents after filtering.
    fn next_chunk(&mut self) -> Result<bool> {
        loop {
            let Some(loc) = self.block.advance()? else {
                self.chunk_loc = None;
                self.clear_batch();
                return Ok(false);
            };
            self.load_chunk(loc)?;
            if !self.chunk.is_empty() {
                return Ok(true);
            }
        }
    }

    fn chunk_has_more(&self) -> bool {
        self.chunk_loc.is_some() && self.chunk.cursor() < self.chunk.len()
    }

    fn emit(&mut self, start: usize, docs: &mut [DocId], freqs: &mut [u32]) -> Result<usize> {
        self.chunk.decode_frequencies(&self.doc_payload, None)?;
        let n = docs
            .len()
            .min(freqs.len())
            .min(self.chunk.len() - start);
        docs[..n].copy_from_slice(&self.chunk.doc_ids()[start..start + n]);
        freqs[..n].copy_from_slice(&self.chunk.freqs()[start..start + n]);
        self.chunk.set_cursor(start + n);
        self.batch_start = start;
        self.batch_len = n;
        self.pos_cursor = 0;
        Ok(n)
    }

    /// Fetch the next chunk as stored, bypassing decoding. Not to be mixed
    /// with the [`PostingReader`] methods on the same reader.
    pub fn next_raw_chunk(&mut self) -> Result<Option<RawChunk>> {
        let Some(loc) = self.block.advance()? else {
            return Ok(None);
        };
        let doc_payload = self.read_doc_payload(&loc)?;
        let pos_payload = self.read_pos_payload(&loc)?;
        let prefix = read_prefix(&doc_payload)?;
        let first_doc_id = loc
            .prev_last_doc_id
            .checked_add(prefix.first_delta)
            .ok_or_else(|| BarrelError::corruption("doc id overflow in chunk"))?;
        if first_doc_id > loc.header.last_doc_id {
            return Err(BarrelError::corruption(format!(
                "{}: chunk {} starts after its last doc",
                self.dfp.name(),
                loc.index
            )));
        }
        Ok(Some(RawChunk {
            doc_count: prefix.doc_count,
            first_doc_id,
            last_doc_id: loc.header.last_doc_id,
            prev_last_doc_id: loc.prev_last_doc_id,
            doc_payload,
            pos_payload,
        }))
    }
}

impl PostingReader for DiskPostingReader {
    fn doc_freq(&self) -> u32 {
        self.descriptor.doc_freq
    }

    fn ctf(&self) -> u64 {
        self.descriptor.ctf
    }

    fn last_doc_id(&self) -> Option<DocId> {
        Some(self.descriptor.last_doc_id)
    }

    fn cur_tf(&self) -> u32 {
        if self.pos_cursor < self.batch_len {
            self.chunk
                .freqs()
                .get(self.batch_start + self.pos_cursor)
                .copied()
                .unwrap_or(0)
        } else {
            0
        }
    }

    fn decode_next(&mut self, docs: &mut [DocId], freqs: &mut [u32]) -> Result<usize> {
        if docs.is_empty() || freqs.is_empty() {
            return Ok(0);
        }
        if !self.chunk_has_more() && !self.next_chunk()? {
            return Ok(0);
        }
        let start = self.chunk.cursor();
        self.emit(start, docs, freqs)
    }

    fn decode_to(
        &mut self,
        target: DocId,
        docs: &mut [DocId],
        freqs: &mut [u32],
    ) -> Result<Option<DecodeTo>> {
        let capacity = docs.len().min(freqs.len());
        if capacity == 0 {
            return Err(BarrelError::invalid_argument("decode_to needs non-empty buffers"));
        }
        if target > self.descriptor.last_doc_id {
            return Ok(None);
        }

        let in_current = self.chunk_has_more()
            && self
                .chunk_loc
                .is_some_and(|loc| loc.header.last_doc_id >= target);
        if !in_current {
            let from = self.block.next_index();
            if let Some(entry) = self.skip_list()?.seek(target, from) {
                self.block.jump(&entry)?;
            }
            loop {
                let Some(loc) = self.block.advance()? else {
                    self.chunk_loc = None;
                    self.clear_batch();
                    return Ok(None);
                };
                if loc.header.last_doc_id >= target {
                    self.load_chunk(loc)?;
                    break;
                }
            }
        }

        loop {
            let start = self.chunk.cursor();
            if let Some(idx) = self.chunk.move_to(target, &self.doc_payload, None)? {
                let batch_start = if idx - start < capacity { start } else { idx };
                let count = self.emit(batch_start, docs, freqs)?;
                return Ok(Some(DecodeTo {
                    count,
                    cursor: idx - batch_start,
                    last_doc_id: docs[count - 1],
                }));
            }
            if !self.next_chunk()? {
                return Ok(None);
            }
        }
    }

    fn decode_next_positions(&mut self, out: &mut Vec<Position>) -> Result<usize> {
        out.clear();
        if self.pos_cursor >= self.batch_len {
            return Ok(0);
        }
        if self.pop.is_some() && !self.chunk.positions_decoded() {
            let loc = self
                .chunk_loc
                .ok_or_else(|| BarrelError::index("no chunk loaded"))?;
            let pos_payload = self.read_pos_payload(&loc)?;
            self.chunk.decode_positions(&pos_payload)?;
        }
        out.extend_from_slice(self.chunk.positions(self.batch_start + self.pos_cursor));
        self.pos_cursor += 1;
        Ok(out.len())
    }

    fn reset_position(&mut self) {
        self.pos_cursor = 0;
    }
}
