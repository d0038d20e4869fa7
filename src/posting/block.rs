//! Block header of a posting: one `(last_doc_id, doc_bytes, pos_bytes)`
//! entry per chunk, decoded strictly in chunk order.

use crate::error::{BarrelError, Result};
use crate::posting::skip::SkipEntry;
use crate::storage::ByteView;
use crate::types::DocId;
use crate::util::varint;

/// Header entry of one chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkHeader {
    pub last_doc_id: DocId,
    /// Bytes of the chunk's doc payload.
    pub doc_bytes: u32,
    /// Bytes of the chunk's position payload.
    pub pos_bytes: u32,
}

impl ChunkHeader {
    pub fn encode(&self, out: &mut Vec<u8>) {
        varint::put_u32(out, self.last_doc_id);
        varint::put_u32(out, self.doc_bytes);
        varint::put_u32(out, self.pos_bytes);
    }
}

/// A chunk located by the block decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLocation {
    pub index: u32,
    pub header: ChunkHeader,
    /// Offset of the doc payload in the payload area.
    pub doc_offset: u64,
    /// Offset of the position payload in the term's position area.
    pub pos_offset: u64,
    /// Last doc id of the previous chunk, 0 for the first one.
    pub prev_last_doc_id: DocId,
}

/// Walks the block header of one posting.
#[derive(Debug, Clone)]
pub struct BlockDecoder {
    header: Vec<u8>,
    chunk_count: u32,
    next_index: u32,
    next_header_offset: usize,
    next_doc_offset: u64,
    next_pos_offset: u64,
    prev_last_doc_id: DocId,
    current: Option<ChunkLocation>,
}

impl BlockDecoder {
    pub fn new(header: Vec<u8>, chunk_count: u32) -> Self {
        BlockDecoder {
            header,
            chunk_count,
            next_index: 0,
            next_header_offset: 0,
            next_doc_offset: 0,
            next_pos_offset: 0,
            prev_last_doc_id: 0,
            current: None,
        }
    }

    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    /// Chunk most recently returned by [`BlockDecoder::advance`].
    pub fn current(&self) -> Option<&ChunkLocation> {
        self.current.as_ref()
    }

    /// Index of the chunk the next `advance` returns.
    pub fn next_index(&self) -> u32 {
        self.next_index
    }

    /// Move to the next chunk. Returns `None` after the last one.
    pub fn advance(&mut self) -> Result<Option<ChunkLocation>> {
        if self.next_index >= self.chunk_count {
            self.current = None;
            return Ok(None);
        }

        let mut view = ByteView::new(&self.header);
        view.seek(self.next_header_offset)?;
        let header = ChunkHeader {
            last_doc_id: view.read_vu32()?,
            doc_bytes: view.read_vu32()?,
            pos_bytes: view.read_vu32()?,
        };
        if self.next_index > 0 && header.last_doc_id <= self.prev_last_doc_id {
            return Err(BarrelError::corruption(format!(
                "chunk {} ends at doc {} after doc {}",
                self.next_index, header.last_doc_id, self.prev_last_doc_id
            )));
        }

        let location = ChunkLocation {
            index: self.next_index,
            header,
            doc_offset: self.next_doc_offset,
            pos_offset: self.next_pos_offset,
            prev_last_doc_id: self.prev_last_doc_id,
        };

        self.next_index += 1;
        self.next_header_offset = view.offset();
        self.next_doc_offset += header.doc_bytes as u64;
        self.next_pos_offset += header.pos_bytes as u64;
        self.prev_last_doc_id = header.last_doc_id;
        self.current = Some(location);
        Ok(Some(location))
    }

    /// Resume at the chunk a skip entry points to. Entries behind the
    /// cursor are ignored.
    pub fn jump(&mut self, entry: &SkipEntry) -> Result<()> {
        if entry.chunk_index <= self.next_index {
            return Ok(());
        }
        if entry.chunk_index > self.chunk_count || entry.header_offset as usize > self.header.len() {
            return Err(BarrelError::corruption(format!(
                "skip entry to chunk {} beyond {} chunks",
                entry.chunk_index, self.chunk_count
            )));
        }
        self.next_index = entry.chunk_index;
        self.next_header_offset = entry.header_offset as usize;
        self.next_doc_offset = entry.doc_offset;
        self.next_pos_offset = entry.position_offset;
        self.prev_last_doc_id = entry.last_doc_id;
        self.current = None;
        Ok(())
    }

    /// Rewind to the first chunk.
    pub fn reset(&mut self) {
        self.next_index = 0;
        self.next_header_offset = 0;
        self.next_doc_offset = 0;
        self.next_pos_offset = 0;
        self.prev_last_doc_id = 0;
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(entries: &[(DocId, u32, u32)]) -> Vec<u8> {
        let mut out = Vec::new();
        for &(last_doc_id, doc_bytes, pos_bytes) in entries {
            ChunkHeader {
                last_doc_id,
                doc_bytes,
                pos_bytes,
            }
            .encode(&mut out);
        }
        out
    }

    #[test]
    fn test_advance_carries_offsets() {
        let bytes = header(&[(10, 20, 5), (30, 15, 0), (31, 7, 2)]);
        let mut block = BlockDecoder::new(bytes, 3);

        let first = block.advance().unwrap().unwrap();
        assert_eq!((first.doc_offset, first.pos_offset, first.prev_last_doc_id), (0, 0, 0));

        let second = block.advance().unwrap().unwrap();
        assert_eq!((second.doc_offset, second.pos_offset, second.prev_last_doc_id), (20, 5, 10));

        let third = block.advance().unwrap().unwrap();
        assert_eq!((third.doc_offset, third.pos_offset, third.prev_last_doc_id), (35, 5, 30));
        assert_eq!(third.header.last_doc_id, 31);

        assert!(block.advance().unwrap().is_none());
        assert!(block.current().is_none());

        block.reset();
        assert_eq!(block.advance().unwrap().unwrap(), first);
    }

    #[test]
    fn test_jump() {
        let entries = [(10, 20, 5), (30, 15, 0), (31, 7, 2)];
        let bytes = header(&entries);
        let mut offset_of_third = Vec::new();
        for &(l, d, p) in &entries[..2] {
            ChunkHeader {
                last_doc_id: l,
                doc_bytes: d,
                pos_bytes: p,
            }
            .encode(&mut offset_of_third);
        }

        let mut block = BlockDecoder::new(bytes, 3);
        block
            .jump(&SkipEntry {
                last_doc_id: 30,
                chunk_index: 2,
                header_offset: offset_of_third.len() as u32,
                doc_offset: 35,
                position_offset: 5,
            })
            .unwrap();
        let third = block.advance().unwrap().unwrap();
        assert_eq!(third.index, 2);
        assert_eq!(third.doc_offset, 35);
        assert_eq!(third.prev_last_doc_id, 30);
    }

    #[test]
    fn test_non_increasing_header_is_corruption() {
        let bytes = header(&[(10, 1, 0), (10, 1, 0)]);
        let mut block = BlockDecoder::new(bytes, 2);
        block.advance().unwrap();
        assert!(block.advance().unwrap_err().is_corruption());

        let mut short = BlockDecoder::new(header(&[(10, 1, 0)]), 2);
        short.advance().unwrap();
        assert!(short.advance().unwrap_err().is_corruption());
    }
}
