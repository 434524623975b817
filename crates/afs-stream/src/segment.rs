#![forbid(unsafe_code)]
//! Segmented virtual stream contract.
//!
//! A backend serves reads for the segments it owns; the generic
//! [`SegmentStream`](crate::SegmentStream) driver maps a logical cursor onto
//! those segments and is written once against [`SegmentHandler`].

use afs_block::ByteDevice;
use afs_error::{AfsError, Result};
use serde::{Deserialize, Serialize};

/// Per-segment flags carried by the segment table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentFlags(pub u32);

impl SegmentFlags {
    pub const NONE: Self = Self(0);
    /// The segment has no backing data and reads as zeros.
    pub const SPARSE: Self = Self(0x0000_0001);

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Per-read flags passed from the driver to the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReadFlags(pub u8);

impl ReadFlags {
    pub const NONE: Self = Self(0);
    /// Bypass cached block contents and fetch from the backing store.
    pub const IGNORE_CACHE: Self = Self(0x01);

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// One logical sub-range of a segmented stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Backing-range identifier handed to the backend.
    pub file_index: usize,
    /// Logical start of the segment within the stream.
    pub offset: u64,
    pub size: u64,
    pub flags: SegmentFlags,
}

/// Backend half of a segmented stream.
///
/// Implementations validate their arguments before touching any state: a
/// rejected call leaves the cursor and cached buffers unchanged.
pub trait SegmentHandler {
    /// Read from the backend's cursor into `segment_data`.
    ///
    /// Returns the number of bytes placed, which is less than
    /// `segment_data.len()` only at end of stream.
    fn read_segment_data(
        &mut self,
        io: &dyn ByteDevice,
        segment_index: usize,
        segment_file_index: usize,
        segment_data: &mut [u8],
        segment_flags: SegmentFlags,
        read_flags: ReadFlags,
    ) -> Result<usize>;

    /// Reposition the backend's cursor and return it.
    ///
    /// Offsets beyond the end of the segment are accepted; the next read
    /// returns 0 bytes.
    fn seek_segment_offset(
        &mut self,
        io: &dyn ByteDevice,
        segment_index: usize,
        segment_file_index: usize,
        segment_offset: i64,
    ) -> Result<u64>;
}

/// Reject read sizes that do not fit a signed byte count.
pub fn ensure_read_size(size: usize) -> Result<()> {
    if size > isize::MAX.unsigned_abs() {
        return Err(AfsError::InvalidArgument(format!(
            "segment data size {size} exceeds maximum"
        )));
    }
    Ok(())
}

/// Single-segment backends serve index 0 only.
pub fn ensure_single_segment(segment_index: usize) -> Result<()> {
    if segment_index != 0 {
        return Err(AfsError::OutOfBounds(format!(
            "segment index {segment_index}"
        )));
    }
    Ok(())
}

pub fn ensure_segment_offset(segment_offset: i64) -> Result<u64> {
    u64::try_from(segment_offset)
        .map_err(|_| AfsError::OutOfBounds(format!("segment offset {segment_offset}")))
}
