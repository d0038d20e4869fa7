//! EWAH (Enhanced Word-Aligned Hybrid) run-length compression of bitsets.
//!
//! The stream is a sequence of marker words, each followed by literal words.
//! A marker packs three fields:
//!
//! | bits   | field                                   |
//! |--------|-----------------------------------------|
//! | 0      | running bit (value of the clean words)  |
//! | 1..33  | number of clean words (all 0s or all 1s)|
//! | 33..64 | number of literal words that follow     |

use serde::{Deserialize, Serialize};

use crate::error::{BarrelError, Result};

const RUNNING_LEN_BITS: u32 = 32;
const LITERAL_LEN_BITS: u32 = 31;
const MAX_RUNNING_LEN: u64 = (1 << RUNNING_LEN_BITS) - 1;
const MAX_LITERAL_LEN: u64 = (1 << LITERAL_LEN_BITS) - 1;

/// A compressed bitset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EwahBitmap {
    /// Marker and literal words.
    pub buffer: Vec<u64>,
    /// Logical size in bits of the uncompressed bitset.
    pub size_in_bits: usize,
    /// Number of uncompressed words the buffer expands to.
    pub word_count: usize,
}

#[inline]
fn marker(running_bit: bool, running_len: u64, literal_len: u64) -> u64 {
    (running_bit as u64) | (running_len << 1) | (literal_len << (1 + RUNNING_LEN_BITS))
}

#[inline]
fn split_marker(word: u64) -> (bool, u64, u64) {
    let running_bit = word & 1 == 1;
    let running_len = (word >> 1) & MAX_RUNNING_LEN;
    let literal_len = word >> (1 + RUNNING_LEN_BITS);
    (running_bit, running_len, literal_len)
}

impl EwahBitmap {
    /// Compress raw bitset words.
    pub fn compress(words: &[u64], size_in_bits: usize) -> Self {
        let mut buffer = Vec::new();
        let mut i = 0;

        while i < words.len() {
            // Clean run: all-zero or all-one words.
            let mut running_bit = false;
            let mut running_len = 0u64;
            if words[i] == 0 || words[i] == u64::MAX {
                running_bit = words[i] == u64::MAX;
                let clean = words[i];
                while i < words.len() && words[i] == clean && running_len < MAX_RUNNING_LEN {
                    running_len += 1;
                    i += 1;
                }
            }

            // Literal run: everything up to the next clean word.
            let literal_start = i;
            while i < words.len()
                && words[i] != 0
                && words[i] != u64::MAX
                && ((i - literal_start) as u64) < MAX_LITERAL_LEN
            {
                i += 1;
            }

            buffer.push(marker(
                running_bit,
                running_len,
                (i - literal_start) as u64,
            ));
            buffer.extend_from_slice(&words[literal_start..i]);
        }

        EwahBitmap {
            buffer,
            size_in_bits,
            word_count: words.len(),
        }
    }

    /// Expand back into raw words. Exact inverse of [`EwahBitmap::compress`].
    pub fn decompress(&self) -> Result<Vec<u64>> {
        let mut words = Vec::with_capacity(self.word_count);
        let mut i = 0;

        while i < self.buffer.len() {
            let (running_bit, running_len, literal_len) = split_marker(self.buffer[i]);
            i += 1;

            let fill = if running_bit { u64::MAX } else { 0 };
            if words.len() as u64 + running_len > self.word_count as u64 {
                return Err(BarrelError::corruption("EWAH clean run exceeds word count"));
            }
            words.extend(std::iter::repeat_n(fill, running_len as usize));

            let literal_len = literal_len as usize;
            let literals = self
                .buffer
                .get(i..i + literal_len)
                .ok_or_else(|| BarrelError::corruption("EWAH literal run truncated"))?;
            words.extend_from_slice(literals);
            i += literal_len;
        }

        if words.len() != self.word_count {
            return Err(BarrelError::corruption(format!(
                "EWAH stream expands to {} words, expected {}",
                words.len(),
                self.word_count
            )));
        }
        Ok(words)
    }

    /// Size of the compressed stream in bytes.
    pub fn size_in_bytes(&self) -> usize {
        self.buffer.len() * 8
    }
}
