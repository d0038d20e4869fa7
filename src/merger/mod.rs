//! Merging flushed barrels into one.
//!
//! The [`BarrelMerger`] plans the output field table and hands each field to
//! a [`FieldMerger`], which runs a k-way merge over the per-barrel term
//! iterators of that field. Cursors live in an arena and are ordered by a
//! [`MergeQueue`] on (term, first doc id, input order), so postings of a term
//! are always concatenated in ingestion order.
//!
//! Two strategies combine the postings of a term:
//!
//! - **Streaming** appends the inputs one after another. Chunks without
//!   deleted documents are copied as stored, only their first doc id is
//!   rebased; the other chunks are decoded, filtered and re-encoded.
//! - **Sorting** decodes every document with its positions into a buffer,
//!   sorts it by doc id and re-encodes it. Documents present in several
//!   inputs have their occurrences combined.
//!
//! [`MergeStrategy::Auto`](crate::config::MergeStrategy::Auto) streams when
//! the inputs of a term cover disjoint, ascending doc-id ranges and sorts
//! otherwise.

pub mod barrel;
pub mod field;
pub mod queue;

use serde::{Deserialize, Serialize};

pub use barrel::{BarrelMerger, MergeInput, MergeOutcome};
pub use field::{FieldInput, FieldMerger};
pub use queue::MergeQueue;

/// Statistics about a merge operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    /// Number of barrels merged.
    pub barrels_merged: usize,

    /// Terms written to the output.
    pub terms_written: u64,

    /// Terms left out because every document was deleted.
    pub terms_dropped: u64,

    /// Terms merged with the streaming strategy.
    pub terms_streamed: u64,

    /// Terms merged with the sorting strategy.
    pub terms_sorted: u64,

    /// Postings (term, document pairs) written.
    pub postings_written: u64,

    /// Postings of deleted documents removed.
    pub deleted_postings_removed: u64,

    /// Chunks copied without decoding.
    pub chunks_copied: u64,

    /// Chunks decoded and re-encoded.
    pub chunks_reencoded: u64,

    /// Time taken for the merge (in milliseconds).
    pub merge_time_ms: u64,
}

impl MergeStats {
    /// Fraction of input chunks that were copied without decoding.
    pub fn copy_ratio(&self) -> f64 {
        let total = self.chunks_copied + self.chunks_reencoded;
        if total == 0 {
            0.0
        } else {
            self.chunks_copied as f64 / total as f64
        }
    }
}
