#![forbid(unsafe_code)]
//! Compressed-data stream handle.
//!
//! The underlying stream stores the file as consecutive compressed blocks of
//! [`COMPRESSED_BLOCK_SIZE`] bytes each, and every block decodes to at most
//! [`COMPRESSED_BLOCK_SIZE`] bytes. The handle keeps the most recently
//! decoded block so sequential reads inside one block touch the underlying
//! stream once.

use crate::codec;
use crate::segment::{
    ReadFlags, SegmentFlags, SegmentHandler, ensure_read_size, ensure_segment_offset,
    ensure_single_segment,
};
use crate::stream::{DataStream, SegmentStream};
use afs_block::ByteDevice;
use afs_error::{AfsError, Result, ResultExt};
use afs_types::{COMPRESSED_BLOCK_SIZE, CompressionMethod};
use tracing::{debug, trace};

const BLOCK_SIZE_U64: u64 = COMPRESSED_BLOCK_SIZE as u64;

pub struct CompressedDataHandle<'a, S: DataStream + ?Sized> {
    current_segment_offset: u64,
    compressed_data_stream: &'a mut S,
    uncompressed_data_size: u64,
    compression_method: CompressionMethod,
    /// Index of the block held in `segment_data`, if any.
    compressed_data_stream_offset: Option<u64>,
    compressed_segment_data: Box<[u8]>,
    segment_data: Box<[u8]>,
    segment_data_size: usize,
}

impl<S: DataStream + ?Sized> std::fmt::Debug for CompressedDataHandle<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressedDataHandle")
            .field("current_segment_offset", &self.current_segment_offset)
            .field("uncompressed_data_size", &self.uncompressed_data_size)
            .field("compression_method", &self.compression_method)
            .field(
                "compressed_data_stream_offset",
                &self.compressed_data_stream_offset,
            )
            .field("segment_data_size", &self.segment_data_size)
            .finish_non_exhaustive()
    }
}

impl<'a, S: DataStream + ?Sized> CompressedDataHandle<'a, S> {
    /// Bind a handle to `compressed_data_stream`.
    ///
    /// `compression_method` is the on-disk method identifier; anything other
    /// than none, deflate or LZVN is rejected before allocating buffers.
    pub fn new(
        compressed_data_stream: &'a mut S,
        uncompressed_data_size: u64,
        compression_method: u32,
    ) -> Result<Self> {
        let compression_method = CompressionMethod::try_from(compression_method)
            .map_err(|_| AfsError::UnsupportedCompression(compression_method))?;
        debug!(
            method = %compression_method,
            uncompressed_data_size,
            compressed_size = compressed_data_stream.size(),
            "compressed data handle created"
        );
        Ok(Self {
            current_segment_offset: 0,
            compressed_data_stream,
            uncompressed_data_size,
            compression_method,
            compressed_data_stream_offset: None,
            compressed_segment_data: vec![0_u8; COMPRESSED_BLOCK_SIZE].into_boxed_slice(),
            segment_data: vec![0_u8; COMPRESSED_BLOCK_SIZE].into_boxed_slice(),
            segment_data_size: 0,
        })
    }

    /// Create a handle in `slot`. Fails if the slot is already occupied.
    pub fn initialize(
        slot: &mut Option<Self>,
        compressed_data_stream: &'a mut S,
        uncompressed_data_size: u64,
        compression_method: u32,
    ) -> Result<()> {
        if slot.is_some() {
            return Err(AfsError::AlreadySet("compressed data stream handle"));
        }
        *slot = Some(Self::new(
            compressed_data_stream,
            uncompressed_data_size,
            compression_method,
        )?);
        Ok(())
    }

    /// Release the handle held in `slot`, if any. The underlying stream is
    /// borrowed and stays with its owner.
    pub fn free(slot: &mut Option<Self>) {
        *slot = None;
    }

    /// Wrap the handle in a single-segment stream of the uncompressed size.
    #[must_use]
    pub fn into_stream(self) -> SegmentStream<Self> {
        let size = self.uncompressed_data_size;
        SegmentStream::single(self, size)
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.current_segment_offset
    }

    #[must_use]
    pub fn uncompressed_data_size(&self) -> u64 {
        self.uncompressed_data_size
    }

    #[must_use]
    pub fn compression_method(&self) -> CompressionMethod {
        self.compression_method
    }

    /// Index of the decoded block currently held, if any.
    #[must_use]
    pub fn cached_block(&self) -> Option<u64> {
        self.compressed_data_stream_offset
    }

    /// Load and decode block `block_index` into the decoded buffer.
    fn fetch_block(&mut self, io: &dyn ByteDevice, block_index: u64) -> Result<()> {
        // Invalidate before the buffers are overwritten.
        self.compressed_data_stream_offset = None;
        self.segment_data_size = 0;

        let offset = block_index.checked_mul(BLOCK_SIZE_U64).ok_or_else(|| {
            AfsError::OutOfBounds(format!("compressed block index {block_index}"))
        })?;
        let read = self
            .compressed_data_stream
            .read_buffer_at_offset(io, &mut self.compressed_segment_data, offset)
            .context("read compressed block")?;
        let valid = codec::decompress(
            self.compression_method,
            &self.compressed_segment_data[..read],
            &mut self.segment_data,
        )
        .context("decompress block")?;
        trace!(block_index, read, valid, "compressed block decoded");

        self.segment_data_size = valid;
        self.compressed_data_stream_offset = Some(block_index);
        Ok(())
    }
}

impl<S: DataStream + ?Sized> SegmentHandler for CompressedDataHandle<'_, S> {
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

        let mut cursor = self.current_segment_offset;
        if cursor >= self.uncompressed_data_size {
            return Ok(0);
        }
        let available = self.uncompressed_data_size - cursor;
        let wanted = usize::try_from(available)
            .map_or(segment_data.len(), |available| available.min(segment_data.len()));

        if read_flags.contains(ReadFlags::IGNORE_CACHE) {
            self.compressed_data_stream_offset = None;
        }

        let mut done = 0_usize;
        while done < wanted {
            let block_index = cursor / BLOCK_SIZE_U64;
            // Less than the block size.
            let in_block = (cursor % BLOCK_SIZE_U64) as usize;

            if self.compressed_data_stream_offset != Some(block_index) {
                self.fetch_block(io, block_index)?;
            }
            if in_block >= self.segment_data_size {
                return Err(AfsError::OutOfBounds(format!(
                    "offset {in_block} beyond decoded block {block_index} of {} bytes",
                    self.segment_data_size
                )));
            }

            let count = (self.segment_data_size - in_block).min(wanted - done);
            segment_data[done..done + count]
                .copy_from_slice(&self.segment_data[in_block..in_block + count]);
            done += count;
            cursor += count as u64;
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
