//! Term access shared by the in-memory and the flushed barrel.

use crate::error::Result;
use crate::posting::{PostingReader, TermInfo};

/// Point lookups in one field's vocabulary.
pub trait TermReader {
    /// Position the reader on `term`. Returns false if the field does not
    /// contain it.
    fn seek(&mut self, term: &str) -> Result<bool>;

    /// Statistics of the term found by the last successful seek.
    fn term_info(&self) -> Option<TermInfo>;

    /// Posting of the term found by the last successful seek.
    fn postings(&self) -> Result<Option<Box<dyn PostingReader + '_>>>;
}

/// Ordered walk over one field's vocabulary.
///
/// A fresh iterator is positioned before the first term.
pub trait TermIterator {
    /// Move to the next term. Returns false once every term was visited.
    fn advance(&mut self) -> Result<bool>;

    fn term(&self) -> Option<&str>;

    fn term_info(&self) -> Option<TermInfo>;

    fn postings(&self) -> Result<Option<Box<dyn PostingReader + '_>>>;
}
