#![forbid(unsafe_code)]
//! Volume-level IO context shared by the stream handles of one volume.

use crate::compressed::CompressedDataHandle;
use crate::data_block::{DataBlockHandle, DataBlockVector};
use crate::stream::{DataStream, SegmentStream};
use afs_block::BlockCache;
use afs_error::{AfsError, Result};
use afs_types::BlockSize;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Options controlling how a volume's streams are served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamOptions {
    /// Number of physical blocks the shared data-block cache may hold.
    pub cache_capacity_blocks: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            cache_capacity_blocks: 1024,
        }
    }
}

/// Read-only block geometry of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoHandle {
    pub block_size: BlockSize,
}

impl IoHandle {
    pub fn new(block_size: u32) -> Result<Self> {
        let block_size =
            BlockSize::new(block_size).map_err(|e| AfsError::InvalidArgument(e.to_string()))?;
        Ok(Self { block_size })
    }
}

/// Volume data context: geometry plus the block cache every data-block
/// stream of the volume shares.
///
/// Cached blocks are keyed by physical block number only and carry no
/// identity of the medium they came from. Every stream built from one
/// context must be read through the same [`ByteDevice`](afs_block::ByteDevice);
/// use a separate context (and cache) per medium.
#[derive(Debug, Clone)]
pub struct VolumeDataHandle {
    io_handle: IoHandle,
    data_block_cache: Arc<BlockCache>,
}

impl VolumeDataHandle {
    pub fn new(io_handle: IoHandle, options: &StreamOptions) -> Result<Self> {
        let cache = BlockCache::new(options.cache_capacity_blocks)?;
        cache.bind_block_len(io_handle.block_size.as_usize())?;
        debug!(
            block_size = io_handle.block_size.get(),
            cache_capacity_blocks = options.cache_capacity_blocks,
            "volume data handle created"
        );
        Ok(Self {
            io_handle,
            data_block_cache: Arc::new(cache),
        })
    }

    /// Build a context around an existing cache, e.g. one shared by several
    /// snapshots of the same volume.
    ///
    /// Fails if the cache is already bound to a different block size.
    pub fn with_cache(io_handle: IoHandle, data_block_cache: Arc<BlockCache>) -> Result<Self> {
        data_block_cache.bind_block_len(io_handle.block_size.as_usize())?;
        Ok(Self {
            io_handle,
            data_block_cache,
        })
    }

    #[must_use]
    pub fn io_handle(&self) -> &IoHandle {
        &self.io_handle
    }

    #[must_use]
    pub fn data_block_cache(&self) -> &Arc<BlockCache> {
        &self.data_block_cache
    }

    /// Data-block stream over `vector`, sharing this volume's block cache.
    #[must_use]
    pub fn data_block_stream<'a>(
        &'a self,
        vector: &'a DataBlockVector,
    ) -> SegmentStream<DataBlockHandle<'a>> {
        DataBlockHandle::new(self, vector).into_stream()
    }

    /// Uncompressed view of `underlying`, which holds fixed-size compressed
    /// blocks encoded with `compression_method`.
    pub fn compressed_stream<'a, S: DataStream + ?Sized>(
        &self,
        underlying: &'a mut S,
        uncompressed_data_size: u64,
        compression_method: u32,
    ) -> Result<SegmentStream<CompressedDataHandle<'a, S>>> {
        CompressedDataHandle::new(underlying, uncompressed_data_size, compression_method)
            .map(CompressedDataHandle::into_stream)
    }
}
