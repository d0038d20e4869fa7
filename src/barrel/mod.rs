//! Barrels: metadata, the in-memory barrel and flushed barrel files.
//!
//! A flushed barrel `<name>` consists of four files:
//!
//! - `<name>.voc`: one vocabulary section per field
//! - `<name>.dfp`: doc ids and frequencies of every posting
//! - `<name>.pop`: positions
//! - `<name>.fdi`: the field table, written last
//!
//! A barrel without its field table is incomplete and never read.

pub mod field;
pub mod info;
pub mod memory;
pub mod reader;
pub mod term;
pub mod vocabulary;
pub mod writer;

pub use field::{FieldInfo, FieldsInfo, fields_file, flags};
pub use info::{BARRELS_FILE, BarrelInfo, BarrelState, BarrelsInfo};
pub use memory::{FieldIndexer, FieldOccurrences, MemBarrel, MemTermIterator, MemTermReader};
pub use reader::{BarrelCaches, BarrelReader, DiskTermIterator, DiskTermReader};
pub use term::{TermIterator, TermReader};
pub use vocabulary::{TermEntry, TermEntryRing, Vocabulary, VocabularyWriter};
pub use writer::{BarrelWriter, remove_barrel_files};

/// File name of a barrel's vocabulary.
pub fn vocabulary_file(barrel: &str) -> String {
    format!("{barrel}.voc")
}

/// File name of a barrel's doc/frequency postings.
pub fn postings_file(barrel: &str) -> String {
    format!("{barrel}.dfp")
}

/// File name of a barrel's positions.
pub fn positions_file(barrel: &str) -> String {
    format!("{barrel}.pop")
}

/// Every file a barrel owns.
pub fn barrel_files(barrel: &str) -> [String; 4] {
    [
        vocabulary_file(barrel),
        postings_file(barrel),
        positions_file(barrel),
        fields_file(barrel),
    ]
}
