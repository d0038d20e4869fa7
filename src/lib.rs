//! # Barrels
//!
//! The on-disk storage engine of an inverted index.
//!
//! ## Features
//!
//! - Barrels (segments) with a persisted directory and per-barrel field tables
//! - Chunked posting lists with VByte or bit-packed compression and skip lists
//! - In-memory and on-disk posting readers behind one [`posting::PostingReader`] trait
//! - K-way barrel merging with streaming and sorting strategies
//! - An LRU listing cache with pinned blocks for concurrent readers
//! - A growable deletion bitset with EWAH compression
//!
//! Tokenization, scoring and query execution live outside this crate: the
//! [`index::Index`] facade accepts already analysed term occurrences and
//! exposes term and posting readers.

pub mod barrel;
pub mod bitset;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod index;
pub mod merger;
pub mod posting;
pub mod storage;
pub mod types;
pub mod util;

pub mod prelude {
    pub use crate::barrel::{FieldOccurrences, TermIterator, TermReader};
    pub use crate::bitset::Bitset;
    pub use crate::config::{Codec, IndexConfig, MergeStrategy};
    pub use crate::error::{BarrelError, Result};
    pub use crate::index::{Index, IndexReader};
    pub use crate::posting::PostingReader;
    pub use crate::storage::{FileStorage, MemoryStorage, Storage};
    pub use crate::types::{CollectionId, DocId, FieldId, Position};
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
