#![forbid(unsafe_code)]
//! Block I/O layer with a shared ARC (Adaptive Replacement Cache).
//!
//! Provides the read-only `ByteDevice` medium trait, file- and memory-backed
//! devices, and the `BlockCache` that data-block streams share to avoid
//! re-reading physical blocks that are already resident.

use afs_error::{AfsError, Result};
use afs_types::{BlockNumber, ByteOffset};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::trace;

/// Byte-addressed, read-only medium with positioned reads (pread semantics).
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read up to `buf.len()` bytes from `offset`.
    ///
    /// Returns fewer bytes than requested only when the end of the device is
    /// reached.
    fn read_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<usize>;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()> {
        let count = self.read_at(offset, buf)?;
        if count != buf.len() {
            return Err(AfsError::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                format!(
                    "short read: offset={offset} len={} got={count} device_len={}",
                    buf.len(),
                    self.len_bytes()
                ),
            )));
        }
        Ok(())
    }
}

/// File-backed byte device using `pread` style I/O.
///
/// This uses `std::os::unix::fs::FileExt`, which is thread-safe and does not
/// require a shared seek position.
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
    len: u64,
}

impl FileByteDevice {
    /// Open an image or disk read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            len,
        })
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<usize> {
        let mut done = 0_usize;
        while done < buf.len() {
            let pos = offset
                .checked_add(done as u64)
                .ok_or_else(|| AfsError::InvalidArgument("read range overflows u64".to_owned()))?;
            match self.file.read_at(&mut buf[done..], pos.0) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(done)
    }
}

/// In-memory byte device over an owned image.
///
/// Counts the positioned reads it serves so callers can observe cache
/// behaviour.
#[derive(Debug, Default)]
pub struct MemoryByteDevice {
    bytes: Vec<u8>,
    read_calls: AtomicU64,
}

impl MemoryByteDevice {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            read_calls: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of `read_at` calls served so far.
    #[must_use]
    pub fn read_calls(&self) -> u64 {
        self.read_calls.load(Ordering::Relaxed)
    }

    pub fn reset_read_calls(&self) {
        self.read_calls.store(0, Ordering::Relaxed);
    }
}

impl ByteDevice for MemoryByteDevice {
    fn len_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<usize> {
        self.read_calls.fetch_add(1, Ordering::Relaxed);
        let Ok(start) = usize::try_from(offset.0) else {
            return Ok(0);
        };
        if start >= self.bytes.len() {
            return Ok(0);
        }
        let count = buf.len().min(self.bytes.len() - start);
        buf[..count].copy_from_slice(&self.bytes[start..start + count]);
        Ok(count)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArcList {
    T1,
    T2,
    B1,
    B2,
}

#[derive(Debug)]
struct ArcState {
    capacity: usize,
    /// Target size for the T1 list.
    p: usize,
    t1: VecDeque<BlockNumber>,
    t2: VecDeque<BlockNumber>,
    b1: VecDeque<BlockNumber>,
    b2: VecDeque<BlockNumber>,
    loc: HashMap<BlockNumber, ArcList>,
    resident: HashMap<BlockNumber, Arc<[u8]>>,
    stats: CacheStats,
}

impl ArcState {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            p: 0,
            t1: VecDeque::new(),
            t2: VecDeque::new(),
            b1: VecDeque::new(),
            b2: VecDeque::new(),
            loc: HashMap::new(),
            resident: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    fn remove_from_list(list: &mut VecDeque<BlockNumber>, key: BlockNumber) -> bool {
        if let Some(pos) = list.iter().position(|k| *k == key) {
            let _ = list.remove(pos);
            return true;
        }
        false
    }

    fn on_hit(&mut self, key: BlockNumber) {
        match self.loc.get(&key).copied() {
            Some(ArcList::T1) => {
                let _ = Self::remove_from_list(&mut self.t1, key);
                self.t2.push_back(key);
                self.loc.insert(key, ArcList::T2);
            }
            Some(ArcList::T2) => {
                let _ = Self::remove_from_list(&mut self.t2, key);
                self.t2.push_back(key);
            }
            Some(ArcList::B1 | ArcList::B2) | None => {}
        }
    }

    /// Evict one resident block into a ghost list when the cache is full.
    fn replace(&mut self, incoming: BlockNumber) {
        if self.t1.len() + self.t2.len() < self.capacity {
            return;
        }
        let t1_len = self.t1.len();
        let prefer_t1 = t1_len >= 1
            && (t1_len > self.p
                || (matches!(self.loc.get(&incoming), Some(ArcList::B2)) && t1_len == self.p));
        if prefer_t1 || self.t2.is_empty() {
            if let Some(victim) = self.t1.pop_front() {
                self.loc.insert(victim, ArcList::B1);
                let _ = self.resident.remove(&victim);
                self.b1.push_back(victim);
            }
        } else if let Some(victim) = self.t2.pop_front() {
            self.loc.insert(victim, ArcList::B2);
            let _ = self.resident.remove(&victim);
            self.b2.push_back(victim);
        }
    }

    fn trim_ghosts(&mut self) {
        while self.b1.len() > self.capacity {
            if let Some(victim) = self.b1.pop_front() {
                let _ = self.loc.remove(&victim);
            }
        }
        while self.b2.len() > self.capacity {
            if let Some(victim) = self.b2.pop_front() {
                let _ = self.loc.remove(&victim);
            }
        }
    }

    fn on_insert(&mut self, key: BlockNumber) {
        match self.loc.get(&key).copied() {
            Some(ArcList::B1) => {
                let delta = (self.b2.len() / self.b1.len().max(1)).max(1);
                self.p = (self.p + delta).min(self.capacity);
                self.replace(key);
                let _ = Self::remove_from_list(&mut self.b1, key);
                self.t2.push_back(key);
                self.loc.insert(key, ArcList::T2);
            }
            Some(ArcList::B2) => {
                let delta = (self.b1.len() / self.b2.len().max(1)).max(1);
                self.p = self.p.saturating_sub(delta);
                self.replace(key);
                let _ = Self::remove_from_list(&mut self.b2, key);
                self.t2.push_back(key);
                self.loc.insert(key, ArcList::T2);
            }
            Some(ArcList::T1 | ArcList::T2) => {}
            None => {
                let l1 = self.t1.len() + self.b1.len();
                let total = l1 + self.t2.len() + self.b2.len();
                if l1 >= self.capacity {
                    if self.t1.len() < self.capacity {
                        let _ = self.b1.pop_front().and_then(|v| self.loc.remove(&v));
                        self.replace(key);
                    } else if let Some(victim) = self.t1.pop_front() {
                        let _ = self.loc.remove(&victim);
                        let _ = self.resident.remove(&victim);
                    }
                } else if total >= self.capacity {
                    if total >= self.capacity.saturating_mul(2) {
                        let _ = self.b2.pop_front().and_then(|v| self.loc.remove(&v));
                    }
                    self.replace(key);
                }
                self.t1.push_back(key);
                self.loc.insert(key, ArcList::T1);
            }
        }
        self.trim_ghosts();
    }
}

/// Counters describing how a [`BlockCache`] has been used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
}

/// Bounded, shareable cache of immutable block contents.
///
/// Keys are physical block numbers so that streams over overlapping extents
/// (cloned files, metadata shared between snapshots) resolve to the same
/// entry. An entry never changes once inserted: a second `put` for a
/// resident key keeps the first bytes.
///
/// Eviction follows ARC: recency (T1) and frequency (T2) lists with ghost
/// lists (B1/B2) steering the adaptive target size.
///
/// A cache may be bound to one block length with [`BlockCache::bind_block_len`];
/// every context sharing it must then use that length.
#[derive(Debug)]
pub struct BlockCache {
    state: Mutex<ArcState>,
    /// Block length this cache serves; 0 while unbound.
    block_len: AtomicUsize,
}

impl BlockCache {
    pub fn new(capacity_blocks: usize) -> Result<Self> {
        if capacity_blocks == 0 {
            return Err(AfsError::InvalidArgument(
                "BlockCache capacity_blocks must be > 0".to_owned(),
            ));
        }
        Ok(Self {
            state: Mutex::new(ArcState::new(capacity_blocks)),
            block_len: AtomicUsize::new(0),
        })
    }

    /// Bind the cache to blocks of `len` bytes.
    ///
    /// The first call binds; later calls succeed only with the same length.
    pub fn bind_block_len(&self, len: usize) -> Result<()> {
        if len == 0 {
            return Err(AfsError::InvalidArgument(
                "BlockCache block length must be > 0".to_owned(),
            ));
        }
        match self
            .block_len
            .compare_exchange(0, len, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(bound) if bound == len => Ok(()),
            Err(bound) => Err(AfsError::InvalidArgument(format!(
                "BlockCache is bound to {bound}-byte blocks, not {len}"
            ))),
        }
    }

    /// Block length the cache is bound to, if any.
    #[must_use]
    pub fn block_len(&self) -> Option<usize> {
        match self.block_len.load(Ordering::Acquire) {
            0 => None,
            len => Some(len),
        }
    }

    /// Look up a resident block, promoting it on a hit.
    #[must_use]
    pub fn get(&self, key: BlockNumber) -> Option<Arc<[u8]>> {
        let mut guard = self.state.lock();
        if let Some(bytes) = guard.resident.get(&key).cloned() {
            guard.on_hit(key);
            guard.stats.hits += 1;
            drop(guard);
            trace!(block = key.0, "block cache hit");
            return Some(bytes);
        }
        guard.stats.misses += 1;
        drop(guard);
        trace!(block = key.0, "block cache miss");
        None
    }

    /// Insert a block and return the resident copy.
    ///
    /// If `key` is already resident the existing bytes are returned and
    /// `block` is dropped.
    pub fn put(&self, key: BlockNumber, block: Arc<[u8]>) -> Arc<[u8]> {
        let mut guard = self.state.lock();
        if let Some(existing) = guard.resident.get(&key).cloned() {
            return existing;
        }
        guard.on_insert(key);
        guard.resident.insert(key, Arc::clone(&block));
        guard.stats.inserts += 1;
        drop(guard);
        block
    }

    /// Number of resident blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().resident.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    #[must_use]
    pub fn contains(&self, key: BlockNumber) -> bool {
        self.state.lock().resident.contains_key(&key)
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }
}
