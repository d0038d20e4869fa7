//! Multi-level skip list over the chunks of one posting.
//!
//! Level `k` holds an entry after every `interval^(k+1)` chunks. An entry
//! records the last doc id of the chunks it covers together with where the
//! following chunk starts, so a reader can resume block decoding there
//! without touching the chunks in between.

use crate::error::{BarrelError, Result};
use crate::storage::ByteView;
use crate::types::DocId;
use crate::util::varint;

/// One skip pointer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipEntry {
    /// Last doc id of the chunks before `chunk_index`.
    pub last_doc_id: DocId,
    /// Chunk decoding resumes at.
    pub chunk_index: u32,
    /// Offset of that chunk's entry in the block header.
    pub header_offset: u32,
    /// Offset of that chunk in the doc payload area.
    pub doc_offset: u64,
    /// Offset of that chunk in the term's position area.
    pub position_offset: u64,
}

/// Skip levels of one posting; level 0 is the densest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipList {
    interval: u32,
    levels: Vec<Vec<SkipEntry>>,
}

impl SkipList {
    /// Build a skip list from the end boundary of every chunk: the entry
    /// each chunk would need to resume right after it.
    pub fn build(chunk_ends: &[SkipEntry], interval: usize, max_level: usize) -> Self {
        let chunk_count = chunk_ends.len();
        let mut levels = Vec::new();
        let mut span = interval.max(2);
        for _ in 0..max_level {
            if span >= chunk_count {
                break;
            }
            let level: Vec<SkipEntry> = (span..chunk_count)
                .step_by(span)
                .map(|next| chunk_ends[next - 1])
                .collect();
            levels.push(level);
            span = span.saturating_mul(interval.max(2));
        }
        SkipList {
            interval: interval.max(2) as u32,
            levels,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, level: usize) -> &[SkipEntry] {
        self.levels.get(level).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Furthest entry past `from_chunk` whose covered documents are all
    /// below `target`. Descends from the sparsest level.
    pub fn seek(&self, target: DocId, from_chunk: u32) -> Option<SkipEntry> {
        let mut best: Option<SkipEntry> = None;
        for (level, entries) in self.levels.iter().enumerate().rev() {
            let span = (self.interval as usize).pow(level as u32 + 1);
            let current = best.map_or(from_chunk, |e| e.chunk_index).max(from_chunk);
            let mut k = current as usize / span;
            while let Some(entry) = entries.get(k)
                && entry.last_doc_id < target
            {
                best = Some(*entry);
                k += 1;
            }
        }
        best
    }

    /// Append the encoded skip list. An empty list encodes to nothing.
    pub fn encode(&self, out: &mut Vec<u8>) {
        if self.levels.is_empty() {
            return;
        }
        varint::put_u32(out, self.interval);
        varint::put_u32(out, self.levels.len() as u32);
        for level in &self.levels {
            varint::put_u32(out, level.len() as u32);
            for entry in level {
                varint::put_u32(out, entry.last_doc_id);
                varint::put_u32(out, entry.chunk_index);
                varint::put_u32(out, entry.header_offset);
                varint::put_u64(out, entry.doc_offset);
                varint::put_u64(out, entry.position_offset);
            }
        }
    }

    /// Parse an encoded skip list.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(SkipList::default());
        }
        let mut view = ByteView::new(bytes);
        let interval = view.read_vu32()?;
        if interval < 2 {
            return Err(BarrelError::corruption(format!(
                "invalid skip interval {interval}"
            )));
        }
        let level_count = view.read_vu32()?;
        let mut levels = Vec::with_capacity(level_count.min(16) as usize);
        for _ in 0..level_count {
            let count = view.read_vu32()?;
            let mut level = Vec::with_capacity(count.min(4096) as usize);
            for _ in 0..count {
                level.push(SkipEntry {
                    last_doc_id: view.read_vu32()?,
                    chunk_index: view.read_vu32()?,
                    header_offset: view.read_vu32()?,
                    doc_offset: view.read_vu64()?,
                    position_offset: view.read_vu64()?,
                });
            }
            levels.push(level);
        }
        if view.remaining() != 0 {
            return Err(BarrelError::corruption("stray bytes after skip list"));
        }
        Ok(SkipList { interval, levels })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Chunk `i` holds docs up to `10 * (i + 1)`.
    fn chunk_ends(chunks: u32) -> Vec<SkipEntry> {
        (0..chunks)
            .map(|i| SkipEntry {
                last_doc_id: 10 * (i + 1),
                chunk_index: i + 1,
                header_offset: 3 * (i + 1),
                doc_offset: 100 * (i as u64 + 1),
                position_offset: 7 * (i as u64 + 1),
            })
            .collect()
    }

    #[test]
    fn test_levels() {
        let skip = SkipList::build(&chunk_ends(20), 2, 3);
        assert_eq!(skip.level_count(), 3);
        let level0: Vec<u32> = skip.level(0).iter().map(|e| e.chunk_index).collect();
        assert_eq!(level0, vec![2, 4, 6, 8, 10, 12, 14, 16, 18]);
        let level1: Vec<u32> = skip.level(1).iter().map(|e| e.chunk_index).collect();
        assert_eq!(level1, vec![4, 8, 12, 16]);
        let level2: Vec<u32> = skip.level(2).iter().map(|e| e.chunk_index).collect();
        assert_eq!(level2, vec![8, 16]);
    }

    #[test]
    fn test_short_posting_has_no_skips() {
        assert!(SkipList::build(&chunk_ends(8), 8, 3).is_empty());
        let mut out = Vec::new();
        SkipList::build(&chunk_ends(3), 8, 3).encode(&mut out);
        assert!(out.is_empty());
        assert!(SkipList::decode(&out).unwrap().is_empty());
    }

    #[test]
    fn test_seek() {
        let skip = SkipList::build(&chunk_ends(20), 2, 3);

        // Doc 5 lives in chunk 0: nothing to skip.
        assert_eq!(skip.seek(5, 0), None);

        // Doc 175 lives in chunk 17: resume at chunk 16.
        let entry = skip.seek(175, 0).unwrap();
        assert_eq!(entry.chunk_index, 16);
        assert_eq!(entry.last_doc_id, 160);
        assert_eq!(entry.doc_offset, 1600);

        // Doc 70 is the last doc of chunk 6: resume at chunk 6.
        assert_eq!(skip.seek(70, 0).unwrap().chunk_index, 6);

        // Never moves backwards.
        assert_eq!(skip.seek(70, 12), None);
        assert_eq!(skip.seek(171, 12).unwrap().chunk_index, 16);
    }

    #[test]
    fn test_seek_matches_linear_scan() {
        let ends = chunk_ends(150);
        let skip = SkipList::build(&ends, 3, 3);
        for target in (0..1600).step_by(7) {
            let expected = skip
                .level(0)
                .iter()
                .filter(|e| e.last_doc_id < target)
                .last()
                .copied();
            assert_eq!(skip.seek(target, 0), expected, "target {target}");
        }
    }

    #[test]
    fn test_encode_decode() {
        let skip = SkipList::build(&chunk_ends(40), 4, 2);
        let mut out = Vec::new();
        skip.encode(&mut out);
        assert_eq!(SkipList::decode(&out).unwrap(), skip);

        out.push(0);
        assert!(SkipList::decode(&out).unwrap_err().is_corruption());
    }
}
