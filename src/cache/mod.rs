//! Listing cache: an LRU cache of fixed-size blocks of a posting file.
//!
//! Readers first admit the blocks a read touches with
//! [`ListingCache::apply_blocks`], which pins them, then fetch each one with
//! [`ListingCache::get_block`] and release the pins with
//! [`ListingCache::free_blocks`]. A block may back several concurrent scans,
//! so pins are counted.
//!
//! Blocks are keyed by file as well as block number. Every file read through
//! a cache takes an id from [`ListingCache::register_file`], so one cache can
//! serve several files.
//!
//! One lock guards the slot table and the LRU order. Storage reads happen
//! outside it; a slot that is being loaded makes other readers of the same
//! block wait on the slot's condition variable instead of reading twice.

mod stats;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use ahash::AHashMap;
use parking_lot::{Condvar, Mutex};

use crate::config::ListingCacheConfig;
use crate::error::{BarrelError, Result};

pub use stats::{CacheStats, CacheStatsSnapshot};

const NIL: usize = usize::MAX;

/// Identity of a file within one cache.
pub type FileId = u64;

type BlockKey = (FileId, u64);

/// Where a cache loads its blocks from.
pub trait BlockSource: Send + Sync {
    /// Read block `block`. Every block is `block_size` bytes except the
    /// last block of the file, which may be shorter.
    fn read_block(&self, block: u64, block_size: usize) -> Result<Vec<u8>>;
}

#[derive(Debug)]
enum SlotState {
    Empty,
    Loading,
    Ready(Arc<[u8]>),
}

#[derive(Debug)]
struct Slot {
    state: Mutex<SlotState>,
    loaded: Condvar,
    pins: AtomicU32,
}

/// Slot bookkeeping: the block held by every slot and an index-linked LRU
/// list, least recently used at the head.
#[derive(Debug)]
struct Lru {
    block_of: Vec<Option<BlockKey>>,
    prev: Vec<usize>,
    next: Vec<usize>,
    head: usize,
    tail: usize,
    map: AHashMap<BlockKey, usize>,
    free: Vec<usize>,
}

impl Lru {
    fn new(slots: usize) -> Self {
        Lru {
            block_of: vec![None; slots],
            prev: vec![NIL; slots],
            next: vec![NIL; slots],
            head: NIL,
            tail: NIL,
            map: AHashMap::with_capacity(slots),
            free: (0..slots).rev().collect(),
        }
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = (self.prev[slot], self.next[slot]);
        if prev == NIL {
            self.head = next;
        } else {
            self.next[prev] = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.prev[next] = prev;
        }
        self.prev[slot] = NIL;
        self.next[slot] = NIL;
    }

    fn push_back(&mut self, slot: usize) {
        self.prev[slot] = self.tail;
        self.next[slot] = NIL;
        if self.tail == NIL {
            self.head = slot;
        } else {
            self.next[self.tail] = slot;
        }
        self.tail = slot;
    }

    fn touch(&mut self, slot: usize) {
        if self.tail != slot {
            self.unlink(slot);
            self.push_back(slot);
        }
    }
}

/// Fixed-capacity block cache of posting files.
#[derive(Debug)]
pub struct ListingCache {
    block_size: usize,
    slots: Vec<Slot>,
    lru: Mutex<Lru>,
    next_file: AtomicU64,
    stats: CacheStats,
}

impl ListingCache {
    pub fn new(slots: usize, block_size: usize) -> Self {
        let slots = slots.max(1);
        ListingCache {
            block_size: block_size.max(1),
            slots: (0..slots)
                .map(|_| Slot {
                    state: Mutex::new(SlotState::Empty),
                    loaded: Condvar::new(),
                    pins: AtomicU32::new(0),
                })
                .collect(),
            lru: Mutex::new(Lru::new(slots)),
            next_file: AtomicU64::new(0),
            stats: CacheStats::default(),
        }
    }

    pub fn from_config(config: &ListingCacheConfig) -> Self {
        Self::new(config.slots, config.block_size)
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Hand out a fresh id for a file about to be read through this cache.
    pub fn register_file(&self) -> FileId {
        self.next_file.fetch_add(1, Ordering::Relaxed)
    }

    /// Whether `block` of `file` currently owns a slot.
    pub fn contains(&self, file: FileId, block: u64) -> bool {
        self.lru.lock().map.contains_key(&(file, block))
    }

    /// Number of blocks owning a slot.
    pub fn len(&self) -> usize {
        self.lru.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Admit and pin blocks `start..end` of `file`.
    ///
    /// Blocks that are not resident take the least recently used unpinned
    /// slot. If no slot can be freed the pins taken by this call are
    /// released and `false` is returned; the caller should read directly
    /// from storage instead.
    pub fn apply_blocks(&self, file: FileId, start: u64, end: u64) -> bool {
        let mut lru = self.lru.lock();
        let mut pinned = Vec::with_capacity(end.saturating_sub(start) as usize);

        for block in start..end {
            let key = (file, block);
            if let Some(&slot) = lru.map.get(&key) {
                self.slots[slot].pins.fetch_add(1, Ordering::AcqRel);
                pinned.push(slot);
                continue;
            }

            let slot = match lru.free.pop() {
                Some(slot) => slot,
                None => match self.find_victim(&lru) {
                    Some(victim) => {
                        if let Some(old) = lru.block_of[victim].take() {
                            lru.map.remove(&old);
                        }
                        lru.unlink(victim);
                        *self.slots[victim].state.lock() = SlotState::Empty;
                        self.stats.record_eviction();
                        victim
                    }
                    None => {
                        for slot in pinned {
                            self.slots[slot].pins.fetch_sub(1, Ordering::AcqRel);
                        }
                        self.stats.record_admission_failure();
                        return false;
                    }
                },
            };

            lru.block_of[slot] = Some(key);
            lru.map.insert(key, slot);
            lru.push_back(slot);
            self.slots[slot].pins.fetch_add(1, Ordering::AcqRel);
            pinned.push(slot);
        }
        true
    }

    /// Least recently used slot without pins. Pins only grow under the LRU
    /// lock, so a slot seen unpinned here stays unpinned until it is
    /// released.
    fn find_victim(&self, lru: &Lru) -> Option<usize> {
        let mut cur = lru.head;
        while cur != NIL {
            if self.slots[cur].pins.load(Ordering::Acquire) == 0 {
                return Some(cur);
            }
            cur = lru.next[cur];
        }
        None
    }

    /// Fetch a pinned block, loading it from `source` on first access, and
    /// mark it most recently used.
    pub fn get_block(
        &self,
        source: &dyn BlockSource,
        file: FileId,
        block: u64,
    ) -> Result<Arc<[u8]>> {
        let slot_idx = {
            let mut lru = self.lru.lock();
            let slot = match lru.map.get(&(file, block)) {
                Some(&slot) if self.slots[slot].pins.load(Ordering::Acquire) > 0 => slot,
                _ => {
                    return Err(BarrelError::index(format!(
                        "block {block} of file {file} was not admitted to the listing cache"
                    )));
                }
            };
            lru.touch(slot);
            slot
        };
        let slot = &self.slots[slot_idx];

        let mut state = slot.state.lock();
        loop {
            if let SlotState::Ready(data) = &*state {
                self.stats.record_hit();
                return Ok(Arc::clone(data));
            }
            if matches!(*state, SlotState::Loading) {
                slot.loaded.wait(&mut state);
                continue;
            }
            break;
        }
        *state = SlotState::Loading;
        drop(state);

        let result = source.read_block(block, self.block_size);

        let mut state = slot.state.lock();
        let outcome = match result {
            Ok(bytes) => {
                let data: Arc<[u8]> = bytes.into();
                *state = SlotState::Ready(Arc::clone(&data));
                self.stats.record_miss();
                Ok(data)
            }
            Err(err) => {
                *state = SlotState::Empty;
                Err(err)
            }
        };
        slot.loaded.notify_all();
        outcome
    }

    /// Release one pin of every block in `start..end` of `file`.
    pub fn free_blocks(&self, file: FileId, start: u64, end: u64) {
        let lru = self.lru.lock();
        for block in start..end {
            if let Some(&slot) = lru.map.get(&(file, block)) {
                let pins = &self.slots[slot].pins;
                let _ = pins.fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| p.checked_sub(1));
            }
        }
    }

    /// Release one pin of `block`.
    pub fn free_block(&self, file: FileId, block: u64) {
        self.free_blocks(file, block, block + 1);
    }

    /// Pins currently held on `block` of `file`.
    pub fn pin_count(&self, file: FileId, block: u64) -> u32 {
        let lru = self.lru.lock();
        lru.map
            .get(&(file, block))
            .map_or(0, |&slot| self.slots[slot].pins.load(Ordering::Acquire))
    }
}
