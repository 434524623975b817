#![forbid(unsafe_code)]
//! Public API facade for read-only APFS-style image access.
//!
//! Re-exports the stream, cache and on-disk layers through one crate so
//! downstream consumers depend on a single stable interface.

pub use afs_block::{BlockCache, ByteDevice, CacheStats, FileByteDevice, MemoryByteDevice};
pub use afs_error::{AfsError, Result, ResultExt};
pub use afs_ondisk::{BtreeNodeHeader, ObjectHeader, SnapshotMetadataTree};
pub use afs_stream::{
    CompressedDataHandle, DataBlockDescriptor, DataBlockFlags, DataBlockHandle, DataBlockVector,
    DataStream, IoHandle, ReadFlags, Segment, SegmentFlags, SegmentHandler, SegmentStream,
    StreamOptions, StreamReader, VolumeDataHandle, codec,
};
pub use afs_types::{BlockNumber, BlockSize, ByteOffset, COMPRESSED_BLOCK_SIZE, CompressionMethod};
