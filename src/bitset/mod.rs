//! Growable bitmap over a dense doc-id universe.
//!
//! [`Bitset`] marks deleted documents. It grows on demand in whole 64-bit
//! words and keeps every bit at or beyond its logical size cleared. Queries
//! never fail: outside the current size they answer `false`/`None`, which is
//! what a sparse deletion filter wants. Setting a single bit fails only for
//! a position whose successor does not fit in `usize`.
//!
//! Mutation is not synchronized. A bitset shared between a deleting writer
//! and concurrent readers must be wrapped in a lock by the owner.

pub mod ewah;

use std::ops::{BitAndAssign, BitOrAssign, BitXorAssign, SubAssign};

use crate::error::{BarrelError, Result};
use crate::storage::{Storage, StructReader, StructWriter, CHECKSUM_LEN};

pub use ewah::EwahBitmap;

const WORD_BITS: usize = 64;

/// Magic number of persisted bitsets ("BSET").
const BITSET_MAGIC: u32 = 0x4253_4554;
const FORMAT_RAW: u8 = 0;
const FORMAT_EWAH: u8 = 1;
/// magic + format + size + word count.
const BITSET_HEADER_LEN: u64 = 4 + 1 + 8 + 8;

#[inline]
fn word_index(pos: usize) -> usize {
    pos / WORD_BITS
}

#[inline]
fn bit_mask(pos: usize) -> u64 {
    1u64 << (pos % WORD_BITS)
}

/// Size a bitset must have to hold `pos`.
#[inline]
fn size_for(pos: usize) -> Result<usize> {
    pos.checked_add(1)
        .ok_or_else(|| BarrelError::invalid_argument(format!("bit position {pos} is out of range")))
}

/// A growable bitmap with rank/select and set algebra.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitset {
    /// Backing words; always exactly `size.div_ceil(64)` long.
    words: Vec<u64>,
    /// Logical size in bits.
    size: usize,
}

impl Bitset {
    /// Create an empty bitset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cleared bitset of `size` bits.
    pub fn with_size(size: usize) -> Self {
        Bitset {
            words: vec![0; size.div_ceil(WORD_BITS)],
            size,
        }
    }

    /// Build a bitset with the given positions set.
    pub fn from_positions<I: IntoIterator<Item = usize>>(positions: I) -> Result<Self> {
        let mut bitset = Bitset::new();
        for pos in positions {
            bitset.set(pos)?;
        }
        Ok(bitset)
    }

    /// Logical size in bits.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the bitset has zero logical size.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Raw backing words.
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Grow the logical size to at least `size` bits.
    pub fn grow(&mut self, size: usize) {
        if size > self.size {
            self.size = size;
            self.words.resize(size.div_ceil(WORD_BITS), 0);
        }
    }

    /// Clear the bits past the logical size in the last word.
    fn trim(&mut self) {
        let tail = self.size % WORD_BITS;
        if tail != 0
            && let Some(last) = self.words.last_mut()
        {
            *last &= (1u64 << tail) - 1;
        }
    }

    /// Test a bit. Positions past the size are clear.
    pub fn test(&self, pos: usize) -> bool {
        pos < self.size && self.words[word_index(pos)] & bit_mask(pos) != 0
    }

    /// Set a bit, growing as needed.
    pub fn set(&mut self, pos: usize) -> Result<()> {
        self.grow(size_for(pos)?);
        self.words[word_index(pos)] |= bit_mask(pos);
        Ok(())
    }

    /// Clear a bit, growing as needed.
    pub fn reset(&mut self, pos: usize) -> Result<()> {
        self.grow(size_for(pos)?);
        self.words[word_index(pos)] &= !bit_mask(pos);
        Ok(())
    }

    /// Flip a bit, growing as needed.
    pub fn flip(&mut self, pos: usize) -> Result<()> {
        self.grow(size_for(pos)?);
        self.words[word_index(pos)] ^= bit_mask(pos);
        Ok(())
    }

    /// Set every bit in `[start, end)`.
    pub fn set_range(&mut self, start: usize, end: usize) {
        self.apply_range(start, end, |word, mask| *word |= mask);
    }

    /// Clear every bit in `[start, end)`.
    pub fn reset_range(&mut self, start: usize, end: usize) {
        self.apply_range(start, end, |word, mask| *word &= !mask);
    }

    /// Flip every bit in `[start, end)`.
    pub fn flip_range(&mut self, start: usize, end: usize) {
        self.apply_range(start, end, |word, mask| *word ^= mask);
    }

    /// Set all bits within the logical size.
    pub fn set_all(&mut self) {
        self.words.fill(u64::MAX);
        self.trim();
    }

    /// Clear all bits, keeping the size.
    pub fn reset_all(&mut self) {
        self.words.fill(0);
    }

    fn apply_range(&mut self, start: usize, end: usize, op: impl Fn(&mut u64, u64)) {
        if start >= end {
            return;
        }
        self.grow(end);

        let first = word_index(start);
        let last = word_index(end - 1);
        for idx in first..=last {
            let lo = if idx == first { start % WORD_BITS } else { 0 };
            let hi = if idx == last {
                (end - 1) % WORD_BITS + 1
            } else {
                WORD_BITS
            };
            let mask = if hi - lo == WORD_BITS {
                u64::MAX
            } else {
                ((1u64 << (hi - lo)) - 1) << lo
            };
            op(&mut self.words[idx], mask);
        }
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Number of set bits in `[start, end)`, clamped to the size.
    pub fn count_range(&self, start: usize, end: usize) -> usize {
        let end = end.min(self.size);
        if start >= end {
            return 0;
        }
        self.rank(end) - self.rank(start)
    }

    /// Number of set bits in `[0, pos)`.
    pub fn rank(&self, pos: usize) -> usize {
        let pos = pos.min(self.size);
        let full = word_index(pos);
        let mut count: usize = self.words[..full]
            .iter()
            .map(|w| w.count_ones() as usize)
            .sum();
        let tail = pos % WORD_BITS;
        if tail != 0 {
            count += (self.words[full] & ((1u64 << tail) - 1)).count_ones() as usize;
        }
        count
    }

    /// Whether any bit is set.
    pub fn any(&self) -> bool {
        self.words.iter().any(|&w| w != 0)
    }

    /// Whether no bit is set.
    pub fn none(&self) -> bool {
        !self.any()
    }

    /// Position of the lowest set bit.
    pub fn find_first(&self) -> Option<usize> {
        self.find_from(0)
    }

    /// Position of the lowest set bit strictly after `pos`.
    pub fn find_next(&self, pos: usize) -> Option<usize> {
        self.find_from(pos.checked_add(1)?)
    }

    fn find_from(&self, start: usize) -> Option<usize> {
        if start >= self.size {
            return None;
        }
        let mut idx = word_index(start);
        let mut word = self.words[idx] & (u64::MAX << (start % WORD_BITS));
        loop {
            if word != 0 {
                return Some(idx * WORD_BITS + word.trailing_zeros() as usize);
            }
            idx += 1;
            if idx >= self.words.len() {
                return None;
            }
            word = self.words[idx];
        }
    }

    /// Position of the highest set bit.
    pub fn find_last(&self) -> Option<usize> {
        if self.size == 0 {
            return None;
        }
        self.find_back_from(self.size - 1)
    }

    /// Position of the highest set bit strictly before `pos`.
    pub fn find_prev(&self, pos: usize) -> Option<usize> {
        if pos == 0 || self.size == 0 {
            return None;
        }
        self.find_back_from((pos - 1).min(self.size - 1))
    }

    fn find_back_from(&self, start: usize) -> Option<usize> {
        let mut idx = word_index(start);
        let shift = WORD_BITS - 1 - start % WORD_BITS;
        let mut word = self.words[idx] & (u64::MAX >> shift);
        loop {
            if word != 0 {
                return Some(idx * WORD_BITS + WORD_BITS - 1 - word.leading_zeros() as usize);
            }
            if idx == 0 {
                return None;
            }
            idx -= 1;
            word = self.words[idx];
        }
    }

    /// Position of the `k`-th set bit (0-based).
    pub fn select(&self, k: usize) -> Option<usize> {
        let mut remaining = k;
        for (idx, &word) in self.words.iter().enumerate() {
            let ones = word.count_ones() as usize;
            if remaining < ones {
                let mut w = word;
                for _ in 0..remaining {
                    w &= w - 1;
                }
                return Some(idx * WORD_BITS + w.trailing_zeros() as usize);
            }
            remaining -= ones;
        }
        None
    }

    /// Iterate over set positions in increasing order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            bitset: self,
            next: self.find_first(),
        }
    }

    /// Compare bits over the shorter of the two sizes.
    pub fn equal_ignore_size(&self, other: &Bitset) -> bool {
        let common = self.size.min(other.size);
        let full = word_index(common);
        if self.words[..full] != other.words[..full] {
            return false;
        }
        let tail = common % WORD_BITS;
        if tail == 0 {
            return true;
        }
        let mask = (1u64 << tail) - 1;
        self.words[full] & mask == other.words[full] & mask
    }

    /// Run-length encode into an EWAH bitmap.
    pub fn compress(&self) -> EwahBitmap {
        EwahBitmap::compress(&self.words, self.size)
    }

    /// Rebuild a bitset from its EWAH encoding.
    pub fn decompress(ewah: &EwahBitmap) -> Result<Self> {
        if ewah.word_count != ewah.size_in_bits.div_ceil(WORD_BITS) {
            return Err(BarrelError::corruption(format!(
                "EWAH bitmap of {} bits cannot hold {} words",
                ewah.size_in_bits, ewah.word_count
            )));
        }
        let mut bitset = Bitset {
            words: ewah.decompress()?,
            size: ewah.size_in_bits,
        };
        bitset.trim();
        Ok(bitset)
    }

    /// Persist the bitset under `name`, raw or EWAH-compressed.
    pub fn write(&self, storage: &dyn Storage, name: &str, compressed: bool) -> Result<()> {
        let (format, words) = if compressed {
            (FORMAT_EWAH, self.compress().buffer)
        } else {
            (FORMAT_RAW, self.words.clone())
        };

        let tmp_name = format!("{name}.tmp");
        let output = storage.create_output(&tmp_name)?;
        let mut writer = StructWriter::new(output);
        writer.write_u32(BITSET_MAGIC)?;
        writer.write_u8(format)?;
        writer.write_u64(self.size as u64)?;
        writer.write_u64(words.len() as u64)?;
        for word in &words {
            writer.write_u64(*word)?;
        }
        writer.close()?;
        storage.rename_file(&tmp_name, name)?;

        log::debug!(
            "wrote bitset {name}: {} bits, {} set, {} words ({})",
            self.size,
            self.count(),
            words.len(),
            if compressed { "ewah" } else { "raw" }
        );
        Ok(())
    }

    /// Load a bitset written by [`Bitset::write`].
    pub fn read(storage: &dyn Storage, name: &str) -> Result<Self> {
        let input = storage.open_input(name)?;
        let mut reader = StructReader::new(input)?;

        let magic = reader.read_u32()?;
        if magic != BITSET_MAGIC {
            return Err(BarrelError::corruption(format!(
                "{name}: invalid bitset magic {magic:#x}"
            )));
        }
        let format = reader.read_u8()?;
        let size = reader.read_u64()?;
        let size = usize::try_from(size)
            .map_err(|_| BarrelError::corruption(format!("{name}: bitset of {size} bits is too large")))?;
        let word_count = reader.read_u64()?;

        let expected = word_count
            .checked_mul(8)
            .and_then(|len| len.checked_add(BITSET_HEADER_LEN + CHECKSUM_LEN));
        if expected != Some(reader.size()) {
            return Err(BarrelError::corruption(format!(
                "{name}: file size {} does not match {word_count} words",
                reader.size()
            )));
        }

        let mut words = Vec::with_capacity(word_count as usize);
        for _ in 0..word_count {
            words.push(reader.read_u64()?);
        }
        reader.verify_checksum()?;

        match format {
            FORMAT_RAW => {
                if words.len() != size.div_ceil(WORD_BITS) {
                    return Err(BarrelError::corruption(format!(
                        "{name}: {} raw words cannot hold {size} bits",
                        words.len()
                    )));
                }
                let mut bitset = Bitset { words, size };
                bitset.trim();
                Ok(bitset)
            }
            FORMAT_EWAH => Bitset::decompress(&EwahBitmap {
                buffer: words,
                size_in_bits: size,
                word_count: size.div_ceil(WORD_BITS),
            }),
            other => Err(BarrelError::corruption(format!(
                "{name}: unknown bitset format {other}"
            ))),
        }
    }
}

/// Iterator over the set positions of a [`Bitset`].
pub struct Iter<'a> {
    bitset: &'a Bitset,
    next: Option<usize>,
}

impl Iterator for Iter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let current = self.next?;
        self.next = self.bitset.find_next(current);
        Some(current)
    }
}

impl BitAndAssign<&Bitset> for Bitset {
    fn bitand_assign(&mut self, rhs: &Bitset) {
        self.grow(rhs.size);
        for (idx, word) in self.words.iter_mut().enumerate() {
            *word &= rhs.words.get(idx).copied().unwrap_or(0);
        }
    }
}

impl BitOrAssign<&Bitset> for Bitset {
    fn bitor_assign(&mut self, rhs: &Bitset) {
        self.grow(rhs.size);
        for (word, other) in self.words.iter_mut().zip(&rhs.words) {
            *word |= other;
        }
    }
}

impl BitXorAssign<&Bitset> for Bitset {
    fn bitxor_assign(&mut self, rhs: &Bitset) {
        self.grow(rhs.size);
        for (word, other) in self.words.iter_mut().zip(&rhs.words) {
            *word ^= other;
        }
    }
}

impl SubAssign<&Bitset> for Bitset {
    fn sub_assign(&mut self, rhs: &Bitset) {
        self.grow(rhs.size);
        for (word, other) in self.words.iter_mut().zip(&rhs.words) {
            *word &= !other;
        }
    }
}
