//! The index facade: ingestion, deletion, flush, merge and readers.
//!
//! An [`Index`] owns the barrel directory, the barrel currently being
//! written, the field registry and the deletion bitset of one storage.
//! [`IndexReader`] is a snapshot over the flushed barrels.

#[allow(clippy::module_inception)]
pub mod index;
pub mod reader;

pub use index::{DELETED_FILE, DOCUMENTS_FILE, Index, IndexStats, MergeReport};
pub use reader::{IndexReader, ReaderBarrel};
