//! Point-in-time read access to every flushed barrel of an index.

use std::sync::Arc;

use crate::barrel::info::BarrelInfo;
use crate::barrel::reader::{BarrelReader, DiskTermReader};
use crate::barrel::term::TermReader;
use crate::bitset::Bitset;
use crate::error::Result;
use crate::posting::{collect_positions, collect_postings};
use crate::types::{DocId, Position};

/// A flushed barrel as seen by an [`IndexReader`].
#[derive(Debug, Clone)]
pub struct ReaderBarrel {
    pub info: BarrelInfo,
    pub reader: Arc<BarrelReader>,
}

/// Snapshot of the flushed barrels and the deletion bitset.
///
/// Barrels are kept in merge order, so postings concatenated across them
/// come out in ascending doc-id order. Later flushes, deletions and merges
/// are not visible; take a new reader to see them.
#[derive(Debug, Clone)]
pub struct IndexReader {
    barrels: Vec<ReaderBarrel>,
    deleted: Arc<Bitset>,
    version: u64,
}

impl IndexReader {
    pub(crate) fn new(barrels: Vec<ReaderBarrel>, deleted: Arc<Bitset>, version: u64) -> Self {
        IndexReader {
            barrels,
            deleted,
            version,
        }
    }

    pub fn barrels(&self) -> &[ReaderBarrel] {
        &self.barrels
    }

    /// Barrel directory version the snapshot was taken at.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Live documents over all barrels.
    pub fn doc_count(&self) -> u64 {
        self.barrels.iter().map(|b| b.info.doc_count as u64).sum()
    }

    pub fn is_deleted(&self, doc_id: DocId) -> bool {
        self.deleted.test(doc_id as usize)
    }

    pub fn deleted(&self) -> &Arc<Bitset> {
        &self.deleted
    }

    fn filter(&self) -> Option<Arc<Bitset>> {
        self.deleted.any().then(|| Arc::clone(&self.deleted))
    }

    /// One term reader per barrel that has `field`, deletions filtered out.
    pub fn term_readers(&self, field: &str) -> Result<Vec<DiskTermReader>> {
        let mut readers = Vec::with_capacity(self.barrels.len());
        for barrel in &self.barrels {
            if let Some(reader) = barrel.reader.term_reader(field, self.filter())? {
                readers.push(reader);
            }
        }
        Ok(readers)
    }

    /// Stored document frequency of a term, summed over barrels. Documents
    /// deleted since their barrel was written are still counted.
    pub fn doc_freq(&self, field: &str, term: &str) -> Result<u64> {
        let mut total = 0;
        for mut reader in self.term_readers(field)? {
            if reader.seek(term)?
                && let Some(info) = reader.term_info()
            {
                total += info.doc_freq as u64;
            }
        }
        Ok(total)
    }

    /// Live `(doc, freq)` postings of a term across all barrels.
    pub fn postings(&self, field: &str, term: &str) -> Result<Vec<(DocId, u32)>> {
        let mut out = Vec::new();
        for mut reader in self.term_readers(field)? {
            if !reader.seek(term)? {
                continue;
            }
            if let Some(mut postings) = reader.postings()? {
                out.extend(collect_postings(postings.as_mut())?);
            }
        }
        Ok(out)
    }

    /// Live `(doc, positions)` postings of a term across all barrels.
    pub fn positions(&self, field: &str, term: &str) -> Result<Vec<(DocId, Vec<Position>)>> {
        let mut out = Vec::new();
        for mut reader in self.term_readers(field)? {
            if !reader.seek(term)? {
                continue;
            }
            if let Some(mut postings) = reader.postings()? {
                out.extend(collect_positions(postings.as_mut())?);
            }
        }
        Ok(out)
    }
}
