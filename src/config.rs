//! Index configuration.
//!
//! [`IndexConfig`] gathers every tunable of the engine. It is plain data,
//! serializable to JSON so that an index directory can carry the settings it
//! was built with.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BarrelError, Result};
use crate::posting::chunk::MAX_CHUNK_DOCS;

/// Integer codec used inside posting chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Codec {
    /// 7-bit continuation varints.
    VByte,
    /// Frame-of-reference bit packing at the minimal width per run.
    BitPacked,
}

impl Codec {
    /// On-disk tag of the codec.
    pub fn tag(self) -> u8 {
        match self {
            Codec::VByte => 0,
            Codec::BitPacked => 1,
        }
    }

    /// Codec for an on-disk tag.
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Codec::VByte),
            1 => Ok(Codec::BitPacked),
            other => Err(BarrelError::corruption(format!("unknown codec tag {other}"))),
        }
    }
}

/// Posting format parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostingConfig {
    /// Maximum number of documents per chunk.
    pub chunk_size: usize,

    /// Chunks covered by one level-0 skip entry.
    pub skip_interval: usize,

    /// Highest skip level written.
    pub max_skip_level: usize,

    /// Codec for doc-id deltas and frequencies.
    pub codec: Codec,
}

impl Default for PostingConfig {
    fn default() -> Self {
        PostingConfig {
            chunk_size: 128,
            skip_interval: 8,
            max_skip_level: 3,
            codec: Codec::BitPacked,
        }
    }
}

/// Listing cache parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingCacheConfig {
    /// Route posting reads through the cache.
    pub enabled: bool,

    /// Number of cache slots.
    pub slots: usize,

    /// Size of one cached block in bytes.
    pub block_size: usize,
}

impl Default for ListingCacheConfig {
    fn default() -> Self {
        ListingCacheConfig {
            enabled: true,
            slots: 1024,
            block_size: 4096,
        }
    }
}

/// How the merger combines postings of one term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeStrategy {
    /// Concatenate compressed chunks; sources must not overlap in doc ids.
    Streaming,
    /// Decode everything, sort by doc id, re-encode.
    Sorting,
    /// Streaming when the sources allow it, sorting otherwise.
    Auto,
}

/// Merge parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Strategy used per term.
    pub strategy: MergeStrategy,

    /// Term entries buffered before they are written to the vocabulary.
    pub term_ring_capacity: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            strategy: MergeStrategy::Auto,
            term_ring_capacity: 256,
        }
    }
}

/// Configuration of an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Posting format.
    pub posting: PostingConfig,

    /// Listing cache.
    pub cache: ListingCacheConfig,

    /// Merger.
    pub merge: MergeConfig,

    /// Bytes of in-memory postings after which the current barrel is flushed.
    pub memory_budget_bytes: usize,

    /// Write the deletion bitset EWAH-compressed.
    pub compress_deletions: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            posting: PostingConfig::default(),
            cache: ListingCacheConfig::default(),
            merge: MergeConfig::default(),
            memory_budget_bytes: 64 * 1024 * 1024, // 64MB
            compress_deletions: true,
        }
    }
}

impl IndexConfig {
    /// Check the configuration for values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.posting.chunk_size == 0 || self.posting.chunk_size > MAX_CHUNK_DOCS {
            return Err(BarrelError::invalid_config(format!(
                "posting.chunk_size must be in 1..={MAX_CHUNK_DOCS}"
            )));
        }
        if self.posting.skip_interval < 2 {
            return Err(BarrelError::invalid_config(
                "posting.skip_interval must be >= 2",
            ));
        }
        if self.cache.slots == 0 {
            return Err(BarrelError::invalid_config("cache.slots must be > 0"));
        }
        if !self.cache.block_size.is_power_of_two() {
            return Err(BarrelError::invalid_config(
                "cache.block_size must be a power of two",
            ));
        }
        if self.merge.term_ring_capacity == 0 {
            return Err(BarrelError::invalid_config(
                "merge.term_ring_capacity must be > 0",
            ));
        }
        Ok(())
    }

    /// Load a configuration from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: IndexConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration as pretty-printed JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
