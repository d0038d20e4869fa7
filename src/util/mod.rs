//! Low-level integer codecs shared by the posting format and metadata files.

pub mod bitpacking;
pub mod varint;
