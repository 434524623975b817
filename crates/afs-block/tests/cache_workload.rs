#![forbid(unsafe_code)]
#![allow(clippy::cast_possible_truncation)]
//! Workload-driven checks of the shared ARC block cache.
//!
//! Each workload drives a `BlockCache` in front of a `MemoryByteDevice` the
//! same way a data-block stream does (get, read on miss, put) and checks the
//! device read count and the hit rate against what ARC should deliver.

use afs_block::{BlockCache, ByteDevice, MemoryByteDevice};
use afs_error::Result;
use afs_types::{BlockNumber, ByteOffset};
use std::sync::Arc;

const BLOCK_SIZE: usize = 4096;

fn image(blocks: usize) -> MemoryByteDevice {
    let mut bytes = vec![0_u8; blocks * BLOCK_SIZE];
    for (idx, chunk) in bytes.chunks_mut(BLOCK_SIZE).enumerate() {
        chunk.fill(idx as u8);
    }
    MemoryByteDevice::new(bytes)
}

fn cached_read(cache: &BlockCache, dev: &dyn ByteDevice, block: u64) -> Result<Arc<[u8]>> {
    let key = BlockNumber(block);
    if let Some(hit) = cache.get(key) {
        return Ok(hit);
    }
    let mut buf = vec![0_u8; BLOCK_SIZE];
    dev.read_exact_at(ByteOffset(block * BLOCK_SIZE as u64), &mut buf)?;
    Ok(cache.put(key, Arc::from(buf)))
}

fn hit_rate(cache: &BlockCache) -> f64 {
    let stats = cache.stats();
    let total = stats.hits + stats.misses;
    if total == 0 {
        return 0.0;
    }
    stats.hits as f64 / total as f64
}

#[test]
fn working_set_that_fits_is_read_once() {
    let dev = image(64);
    let cache = BlockCache::new(32).expect("cache");

    for _ in 0..10 {
        for block in 0..32 {
            let data = cached_read(&cache, &dev, block).expect("read");
            assert_eq!(data[0], block as u8);
        }
    }

    assert_eq!(dev.read_calls(), 32);
    assert!(hit_rate(&cache) > 0.89, "hit rate {}", hit_rate(&cache));
}

#[test]
fn hot_metadata_survives_sequential_file_scan() {
    let dev = image(256);
    let cache = BlockCache::new(16).expect("cache");
    let hot = [0_u64, 1, 2, 3];

    // Warm the hot set twice so it lands in the frequency list.
    for _ in 0..2 {
        for &block in &hot {
            cached_read(&cache, &dev, block).expect("warm");
        }
    }

    for block in 100..250 {
        cached_read(&cache, &dev, block).expect("scan");
        if block % 10 == 0 {
            for &hot_block in &hot {
                cached_read(&cache, &dev, hot_block).expect("hot");
            }
        }
    }

    for &block in &hot {
        assert!(cache.contains(BlockNumber(block)), "hot block {block} evicted");
    }
    // Hot blocks were fetched exactly once; every scan block once.
    assert_eq!(dev.read_calls(), 4 + 150);
}

#[test]
fn shared_cache_serves_overlapping_readers() {
    let dev = image(16);
    let cache = Arc::new(BlockCache::new(8).expect("cache"));

    let first = Arc::clone(&cache);
    for block in [3_u64, 4, 5] {
        cached_read(&first, &dev, block).expect("first reader");
    }
    let reads_after_first = dev.read_calls();

    let second = Arc::clone(&cache);
    for block in [4_u64, 5] {
        let data = cached_read(&second, &dev, block).expect("second reader");
        assert_eq!(data[BLOCK_SIZE - 1], block as u8);
    }

    assert_eq!(dev.read_calls(), reads_after_first);
    assert_eq!(cache.stats().hits, 2);
}
