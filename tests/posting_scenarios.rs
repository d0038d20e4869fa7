#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use barrels::bitset::Bitset;
    use barrels::cache::{BlockSource, ListingCache};
    use barrels::error::Result;
    use barrels::posting::{MemPostingWriter, PostingReader, collect_positions};
    use barrels::storage::{MemoryStorage, Storage};

    #[test]
    fn test_memory_postings_decode_in_order() {
        let mut writer = MemPostingWriter::new(true, 2);
        for (doc, freq) in [(1, 2), (5, 1), (9, 3)] {
            for pos in 0..freq {
                writer.add(doc, pos * 2).unwrap();
            }
        }
        writer.end_document();

        let mut reader = writer.reader();
        assert_eq!(reader.doc_freq(), 3);
        assert_eq!(reader.ctf(), 6);
        assert_eq!(reader.last_doc_id(), Some(9));

        let mut docs = [0; 8];
        let mut freqs = [0; 8];
        let n = reader.decode_next(&mut docs, &mut freqs).unwrap();
        assert_eq!(n, 3);
        assert_eq!(&docs[..n], &[1, 5, 9]);
        assert_eq!(&freqs[..n], &[2, 1, 3]);
        assert_eq!(reader.decode_next(&mut docs, &mut freqs).unwrap(), 0);

        let positions = collect_positions(&mut writer.reader()).unwrap();
        assert_eq!(positions[2], (9, vec![0, 2, 4]));
    }

    #[test]
    fn test_bitset_navigation() {
        let mut bitset = Bitset::with_size(10);
        for pos in [2, 5, 9] {
            bitset.set(pos).unwrap();
        }

        assert_eq!(bitset.find_first(), Some(2));
        assert_eq!(bitset.find_next(2), Some(5));
        assert_eq!(bitset.find_next(5), Some(9));
        assert_eq!(bitset.find_next(9), None);
        assert_eq!(bitset.count_range(0, 10), 3);
        assert_eq!(bitset.count_range(3, 9), 1);
    }

    #[test]
    fn test_bitset_survives_storage() {
        let storage = MemoryStorage::new();
        let bitset = Bitset::from_positions([0, 1, 2, 3, 700, 4096]).unwrap();

        for compressed in [true, false] {
            bitset.write(&storage, "deleted.bits", compressed).unwrap();
            let loaded = Bitset::read(&storage, "deleted.bits").unwrap();
            assert_eq!(loaded.count_range(0, loaded.size()), 6);
            assert!(loaded.test(4096));
            assert!(!loaded.test(4095));
        }
        assert!(storage.file_exists("deleted.bits"));
    }

    struct Blocks {
        reads: AtomicUsize,
    }

    impl BlockSource for Blocks {
        fn read_block(&self, block: u64, block_size: usize) -> Result<Vec<u8>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(vec![block as u8; block_size])
        }
    }

    #[test]
    fn test_listing_cache_evicts_least_recently_used() {
        let capacity = 4;
        let cache = ListingCache::new(capacity, 64);
        let file = cache.register_file();
        let source = Blocks {
            reads: AtomicUsize::new(0),
        };

        for block in 0..capacity as u64 {
            assert!(cache.apply_blocks(file, block, block + 1));
            assert_eq!(cache.get_block(&source, file, block).unwrap()[0], block as u8);
            cache.free_block(file, block);
        }

        // Block 0 becomes the most recent; block 1 is now the eviction victim.
        assert!(cache.apply_blocks(file, 0, 1));
        cache.get_block(&source, file, 0).unwrap();
        cache.free_block(file, 0);

        assert!(cache.apply_blocks(file, capacity as u64, capacity as u64 + 1));
        cache.get_block(&source, file, capacity as u64).unwrap();
        cache.free_block(file, capacity as u64);

        assert_eq!(cache.len(), capacity);
        assert!(cache.contains(file, 0));
        assert!(!cache.contains(file, 1));
        assert!(cache.contains(file, capacity as u64));

        let stats = cache.stats();
        assert_eq!(stats.misses, capacity as u64 + 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.evictions, 1);
        assert_eq!(source.reads.load(Ordering::SeqCst), capacity + 1);
    }

    #[test]
    fn test_listing_cache_refuses_when_all_pinned() {
        let cache = Arc::new(ListingCache::new(2, 16));
        let file = cache.register_file();
        let source = Blocks {
            reads: AtomicUsize::new(0),
        };

        assert!(cache.apply_blocks(file, 0, 2));
        assert!(!cache.apply_blocks(file, 2, 3));
        assert_eq!(cache.stats().admission_failures, 1);
        assert_eq!(cache.pin_count(file, 0), 1);

        cache.free_blocks(file, 0, 2);
        assert!(cache.apply_blocks(file, 2, 3));
        assert_eq!(cache.get_block(&source, file, 2).unwrap().len(), 16);
        cache.free_block(file, 2);
    }
}
