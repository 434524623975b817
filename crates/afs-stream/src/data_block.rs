#![forbid(unsafe_code)]
//! Data-block stream handle: a logical stream over an ordered vector of
//! block descriptors, read through the volume's shared block cache.

use crate::segment::{
    ReadFlags, SegmentFlags, SegmentHandler, ensure_read_size, ensure_segment_offset,
    ensure_single_segment,
};
use crate::stream::SegmentStream;
use crate::volume::{IoHandle, VolumeDataHandle};
use afs_block::{BlockCache, ByteDevice};
use afs_error::{AfsError, Result, ResultExt};
use afs_types::BlockNumber;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataBlockFlags(pub u32);

impl DataBlockFlags {
    pub const NONE: Self = Self(0);
    /// Unallocated range; reads as zeros.
    pub const SPARSE: Self = Self(0x0000_0001);

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Maps `size` logical bytes onto consecutive physical blocks starting at
/// `physical_block`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataBlockDescriptor {
    pub physical_block: BlockNumber,
    pub size: u64,
    pub flags: DataBlockFlags,
}

impl DataBlockDescriptor {
    #[must_use]
    pub fn new(physical_block: BlockNumber, size: u64) -> Self {
        Self {
            physical_block,
            size,
            flags: DataBlockFlags::NONE,
        }
    }

    #[must_use]
    pub fn sparse(size: u64) -> Self {
        Self {
            physical_block: BlockNumber(0),
            size,
            flags: DataBlockFlags::SPARSE,
        }
    }

    #[must_use]
    pub fn is_sparse(&self) -> bool {
        self.flags.contains(DataBlockFlags::SPARSE)
    }
}

/// Ordered, immutable descriptor list partitioning a logical address space.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataBlockVector {
    descriptors: Vec<DataBlockDescriptor>,
    /// Logical start of each descriptor.
    starts: Vec<u64>,
    size: u64,
}

impl DataBlockVector {
    pub fn new(descriptors: Vec<DataBlockDescriptor>) -> Result<Self> {
        let mut starts = Vec::with_capacity(descriptors.len());
        let mut size = 0_u64;
        for (index, desc) in descriptors.iter().enumerate() {
            if desc.size == 0 {
                return Err(AfsError::InvalidArgument(format!(
                    "data block descriptor {index} is empty"
                )));
            }
            starts.push(size);
            size = size.checked_add(desc.size).ok_or_else(|| {
                AfsError::InvalidArgument("data block vector size overflows u64".to_owned())
            })?;
        }
        Ok(Self {
            descriptors,
            starts,
            size,
        })
    }

    /// Total logical size covered by all descriptors.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&DataBlockDescriptor> {
        self.descriptors.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataBlockDescriptor> {
        self.descriptors.iter()
    }

    /// Descriptor covering logical `offset` and that descriptor's start.
    #[must_use]
    pub fn find(&self, offset: u64) -> Option<(&DataBlockDescriptor, u64)> {
        if offset >= self.size {
            return None;
        }
        let index = self.starts.partition_point(|&start| start <= offset) - 1;
        Some((&self.descriptors[index], self.starts[index]))
    }
}

/// Single-segment backend over a [`DataBlockVector`].
///
/// Borrows the volume geometry and descriptor vector; shares the volume's
/// block cache. Dropping the handle releases none of them.
#[derive(Debug)]
pub struct DataBlockHandle<'a> {
    current_segment_offset: u64,
    io_handle: &'a IoHandle,
    data_block_vector: &'a DataBlockVector,
    data_block_cache: Arc<BlockCache>,
}

impl<'a> DataBlockHandle<'a> {
    #[must_use]
    pub fn new(volume: &'a VolumeDataHandle, data_block_vector: &'a DataBlockVector) -> Self {
        Self {
            current_segment_offset: 0,
            io_handle: volume.io_handle(),
            data_block_vector,
            data_block_cache: Arc::clone(volume.data_block_cache()),
        }
    }

    /// Create a handle in `slot`. Fails if the slot is already occupied.
    pub fn initialize(
        slot: &mut Option<Self>,
        volume: &'a VolumeDataHandle,
        data_block_vector: &'a DataBlockVector,
    ) -> Result<()> {
        if slot.is_some() {
            return Err(AfsError::AlreadySet("data block stream handle"));
        }
        *slot = Some(Self::new(volume, data_block_vector));
        Ok(())
    }

    /// Release the handle held in `slot`, if any.
    pub fn free(slot: &mut Option<Self>) {
        *slot = None;
    }

    /// Wrap the handle in a single-segment stream spanning the vector.
    #[must_use]
    pub fn into_stream(self) -> SegmentStream<Self> {
        let size = self.data_block_vector.size();
        SegmentStream::single(self, size)
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.current_segment_offset
    }

    fn read_block(
        &self,
        io: &dyn ByteDevice,
        block: BlockNumber,
        read_flags: ReadFlags,
    ) -> Result<Arc<[u8]>> {
        let block_size = self.io_handle.block_size;
        let use_cache = !read_flags.contains(ReadFlags::IGNORE_CACHE);
        if use_cache {
            if let Some(hit) = self.data_block_cache.get(block) {
                return ensure_block_len(block, hit, block_size.as_usize());
            }
        }

        let offset = block_size.block_to_byte(block).ok_or_else(|| AfsError::Corruption {
            block: block.0,
            detail: "physical block offset overflows u64".to_owned(),
        })?;
        let mut buf = vec![0_u8; block_size.as_usize()];
        io.read_exact_at(offset, &mut buf)
            .context("read data block")?;
        trace!(block = block.0, "data block fetched");

        let buf: Arc<[u8]> = Arc::from(buf);
        if use_cache {
            let resident = self.data_block_cache.put(block, buf);
            return ensure_block_len(block, resident, block_size.as_usize());
        }
        Ok(buf)
    }
}

/// Cached entries must match the volume's block size.
fn ensure_block_len(
    block: BlockNumber,
    bytes: Arc<[u8]>,
    block_size: usize,
) -> Result<Arc<[u8]>> {
    if bytes.len() != block_size {
        return Err(AfsError::Corruption {
            block: block.0,
            detail: format!(
                "cached block holds {} bytes, volume block size is {block_size}",
                bytes.len()
            ),
        });
    }
    Ok(bytes)
}

impl SegmentHandler for DataBlockHandle<'_> {
    fn read_segment_data(
        &mut self,
        io: &dyn ByteDevice,
        segment_index: usize,
        _segment_file_index: usize,
        segment_data: &mut [u8],
        _segment_flags: SegmentFlags,
        read_flags: ReadFlags,
    ) -> Result<usize> {
        ensure_single_segment(segment_index)?;
        ensure_read_size(segment_data.len())?;

        let block_size = u64::from(self.io_handle.block_size.get());
        let mut cursor = self.current_segment_offset;
        let mut done = 0_usize;

        while done < segment_data.len() {
            let Some((desc, desc_start)) = self.data_block_vector.find(cursor) else {
                break;
            };
            let in_desc = cursor - desc_start;
            let in_block = in_desc % block_size;
            let len = (block_size - in_block)
                .min(desc.size - in_desc)
                .min((segment_data.len() - done) as u64);
            // Bounded by the block size.
            let len = len as usize;
            let out = &mut segment_data[done..done + len];

            if desc.is_sparse() {
                out.fill(0);
            } else {
                let physical = desc
                    .physical_block
                    .0
                    .checked_add(in_desc / block_size)
                    .map(BlockNumber)
                    .ok_or_else(|| AfsError::Corruption {
                        block: desc.physical_block.0,
                        detail: "descriptor extends past the end of the address space".to_owned(),
                    })?;
                let block = self.read_block(io, physical, read_flags)?;
                let start = in_block as usize;
                out.copy_from_slice(&block[start..start + len]);
            }

            done += len;
            cursor += len as u64;
        }

        self.current_segment_offset = cursor;
        Ok(done)
    }

    fn seek_segment_offset(
        &mut self,
        _io: &dyn ByteDevice,
        segment_index: usize,
        _segment_file_index: usize,
        segment_offset: i64,
    ) -> Result<u64> {
        ensure_single_segment(segment_index)?;
        self.current_segment_offset = ensure_segment_offset(segment_offset)?;
        Ok(self.current_segment_offset)
    }
}
