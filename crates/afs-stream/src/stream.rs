#![forbid(unsafe_code)]
//! Generic segmented stream driver.

use crate::segment::{
    ReadFlags, Segment, SegmentFlags, SegmentHandler, ensure_read_size, ensure_segment_offset,
};
use afs_block::ByteDevice;
use afs_error::{AfsError, Result, ResultExt};
use std::io::{self, Read, Seek, SeekFrom};
use tracing::trace;

/// Positioned-read view of a logical byte stream.
///
/// This is the primitive a compressed stream pulls its raw blocks through.
pub trait DataStream {
    /// Logical size in bytes.
    fn size(&self) -> u64;

    /// Read up to `buf.len()` bytes starting at logical byte `offset`.
    ///
    /// Returns fewer bytes than requested only at end of stream.
    fn read_buffer_at_offset(
        &mut self,
        io: &dyn ByteDevice,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<usize>;
}

/// Logical stream over an ordered set of segments served by one backend.
///
/// Segments are laid out back to back in logical offset space. The driver
/// owns the logical cursor; the backend is sought to the in-segment offset
/// before every read.
#[derive(Debug)]
pub struct SegmentStream<H> {
    handler: H,
    segments: Vec<Segment>,
    size: u64,
    current_offset: u64,
    read_flags: ReadFlags,
}

impl<H: SegmentHandler> SegmentStream<H> {
    /// Stream with no segments; add them with [`Self::append_segment`].
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            segments: Vec::new(),
            size: 0,
            current_offset: 0,
            read_flags: ReadFlags::NONE,
        }
    }

    /// Stream consisting of segment 0 of `size` bytes.
    pub fn single(handler: H, size: u64) -> Self {
        let mut stream = Self::new(handler);
        stream.segments.push(Segment {
            file_index: 0,
            offset: 0,
            size,
            flags: SegmentFlags::NONE,
        });
        stream.size = size;
        stream
    }

    /// Append a segment after the current end of the stream and return its index.
    pub fn append_segment(
        &mut self,
        file_index: usize,
        size: u64,
        flags: SegmentFlags,
    ) -> Result<usize> {
        let end = self
            .size
            .checked_add(size)
            .ok_or_else(|| AfsError::InvalidArgument("stream size overflows u64".to_owned()))?;
        self.segments.push(Segment {
            file_index,
            offset: self.size,
            size,
            flags,
        });
        self.size = end;
        Ok(self.segments.len() - 1)
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Current logical offset.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.current_offset
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    #[must_use]
    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    pub fn set_read_flags(&mut self, read_flags: ReadFlags) {
        self.read_flags = read_flags;
    }

    /// Move the logical cursor. Offsets past the end are allowed.
    pub fn seek_offset(&mut self, offset: i64) -> Result<u64> {
        self.current_offset = ensure_segment_offset(offset)?;
        Ok(self.current_offset)
    }

    /// Index of the segment covering `offset`, if any.
    fn segment_at(&self, offset: u64) -> Option<usize> {
        let idx = self.segments.partition_point(|seg| seg.offset <= offset);
        let idx = idx.checked_sub(1)?;
        let seg = &self.segments[idx];
        (offset - seg.offset < seg.size).then_some(idx)
    }

    /// Read from the cursor into `buf`, crossing segment boundaries.
    ///
    /// On error the cursor is left where it was.
    pub fn read_buffer(&mut self, io: &dyn ByteDevice, buf: &mut [u8]) -> Result<usize> {
        ensure_read_size(buf.len())?;
        let mut cursor = self.current_offset;
        let mut done = 0_usize;

        while done < buf.len() {
            let Some(segment_index) = self.segment_at(cursor) else {
                break;
            };
            let segment = self.segments[segment_index];
            let in_segment = cursor - segment.offset;
            let want = usize::try_from(segment.size - in_segment)
                .unwrap_or(usize::MAX)
                .min(buf.len() - done);
            let out = &mut buf[done..done + want];

            let count = if segment.flags.contains(SegmentFlags::SPARSE) {
                out.fill(0);
                want
            } else {
                let seg_offset = i64::try_from(in_segment).map_err(|_| {
                    AfsError::OutOfBounds(format!("segment offset {in_segment}"))
                })?;
                self.handler
                    .seek_segment_offset(io, segment_index, segment.file_index, seg_offset)
                    .context("seek segment offset")?;
                self.handler
                    .read_segment_data(
                        io,
                        segment_index,
                        segment.file_index,
                        out,
                        segment.flags,
                        self.read_flags,
                    )
                    .context("read segment data")?
            };
            trace!(segment_index, in_segment, count, "segment read");

            done += count;
            cursor += count as u64;
            if count < want {
                break;
            }
        }

        self.current_offset = cursor;
        Ok(done)
    }

    /// Standard I/O adaptor bound to `io` for the duration of the borrow.
    pub fn reader<'s>(&'s mut self, io: &'s dyn ByteDevice) -> StreamReader<'s, H> {
        StreamReader { stream: self, io }
    }
}

impl<H: SegmentHandler> DataStream for SegmentStream<H> {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_buffer_at_offset(
        &mut self,
        io: &dyn ByteDevice,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<usize> {
        let offset = i64::try_from(offset)
            .map_err(|_| AfsError::OutOfBounds(format!("stream offset {offset}")))?;
        self.seek_offset(offset)?;
        self.read_buffer(io, buf)
    }
}

/// `std::io::Read` + `Seek` view of a [`SegmentStream`].
pub struct StreamReader<'s, H> {
    stream: &'s mut SegmentStream<H>,
    io: &'s dyn ByteDevice,
}

fn to_io_error(err: AfsError) -> io::Error {
    match err {
        AfsError::Io(inner) => inner,
        other if other.is_io() => io::Error::other(other),
        other if other.is_argument() => io::Error::new(io::ErrorKind::InvalidInput, other),
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}

impl<H: SegmentHandler> Read for StreamReader<'_, H> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read_buffer(self.io, buf).map_err(to_io_error)
    }
}

impl<H: SegmentHandler> Seek for StreamReader<'_, H> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.stream.size().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.stream.offset().checked_add_signed(delta),
        };
        let target = target.and_then(|t| i64::try_from(t).ok()).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )
        })?;
        self.stream.seek_offset(target).map_err(to_io_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{ensure_segment_offset, ensure_single_segment};
    use afs_block::MemoryByteDevice;

    /// Backend serving each segment from its own byte vector.
    struct VecSegments {
        files: Vec<Vec<u8>>,
        cursor: u64,
        reads: usize,
    }

    impl SegmentHandler for VecSegments {
        fn read_segment_data(
            &mut self,
            _io: &dyn ByteDevice,
            _segment_index: usize,
            segment_file_index: usize,
            segment_data: &mut [u8],
            _segment_flags: SegmentFlags,
            _read_flags: ReadFlags,
        ) -> Result<usize> {
            self.reads += 1;
            let file = &self.files[segment_file_index];
            let start = usize::try_from(self.cursor).unwrap_or(usize::MAX).min(file.len());
            let count = segment_data.len().min(file.len() - start);
            segment_data[..count].copy_from_slice(&file[start..start + count]);
            self.cursor += count as u64;
            Ok(count)
        }

        fn seek_segment_offset(
            &mut self,
            _io: &dyn ByteDevice,
            _segment_index: usize,
            _segment_file_index: usize,
            segment_offset: i64,
        ) -> Result<u64> {
            self.cursor = ensure_segment_offset(segment_offset)?;
            Ok(self.cursor)
        }
    }

    /// Single-segment backend that always fails with an I/O error.
    struct Broken;

    impl SegmentHandler for Broken {
        fn read_segment_data(
            &mut self,
            _io: &dyn ByteDevice,
            segment_index: usize,
            _segment_file_index: usize,
            _segment_data: &mut [u8],
            _segment_flags: SegmentFlags,
            _read_flags: ReadFlags,
        ) -> Result<usize> {
            ensure_single_segment(segment_index)?;
            Err(std::io::Error::other("medium unreadable").into())
        }

        fn seek_segment_offset(
            &mut self,
            _io: &dyn ByteDevice,
            segment_index: usize,
            _segment_file_index: usize,
            segment_offset: i64,
        ) -> Result<u64> {
            ensure_single_segment(segment_index)?;
            ensure_segment_offset(segment_offset)
        }
    }

    fn three_segments() -> SegmentStream<VecSegments> {
        let handler = VecSegments {
            files: vec![b"hello ".to_vec(), b"segmented ".to_vec()],
            cursor: 0,
            reads: 0,
        };
        let mut stream = SegmentStream::new(handler);
        stream.append_segment(0, 6, SegmentFlags::NONE).expect("seg");
        stream.append_segment(0, 4, SegmentFlags::SPARSE).expect("seg");
        stream.append_segment(1, 10, SegmentFlags::NONE).expect("seg");
        stream
    }

    #[test]
    fn reads_across_segments_and_sparse_ranges() {
        let io = MemoryByteDevice::default();
        let mut stream = three_segments();
        assert_eq!(stream.size(), 20);

        let mut buf = [0xAA_u8; 32];
        let count = stream.read_buffer(&io, &mut buf).expect("read");
        assert_eq!(count, 20);
        assert_eq!(&buf[..20], b"hello \0\0\0\0segmented ");
        assert_eq!(stream.offset(), 20);
        // Sparse segment never reached the backend.
        assert_eq!(stream.handler().reads, 2);

        stream.handler_mut().reads = 0;
        stream.read_buffer_at_offset(&io, &mut buf, 14).expect("read");
        let handler = stream.into_handler();
        assert_eq!(handler.reads, 1);
        assert_eq!(handler.cursor, 10);
    }

    #[test]
    fn seek_then_read_matches_prefix_read() {
        let io = MemoryByteDevice::default();
        let mut whole = [0_u8; 20];
        three_segments().read_buffer(&io, &mut whole).expect("read");

        for k in 0..20_u64 {
            let mut stream = three_segments();
            let mut tail = vec![0_u8; 20 - k as usize];
            let count = stream.read_buffer_at_offset(&io, &mut tail, k).expect("read");
            assert_eq!(count, tail.len());
            assert_eq!(&tail[..], &whole[k as usize..], "offset {k}");
        }
    }

    #[test]
    fn read_past_end_returns_zero() {
        let io = MemoryByteDevice::default();
        let mut stream = three_segments();
        assert_eq!(stream.seek_offset(500).expect("seek"), 500);
        let mut buf = [0_u8; 4];
        assert_eq!(stream.read_buffer(&io, &mut buf).expect("read"), 0);
        assert!(stream.seek_offset(-1).is_err());
        assert_eq!(stream.offset(), 500);
    }

    #[test]
    fn failed_read_keeps_cursor_and_reports_io() {
        let io = MemoryByteDevice::default();
        let mut stream = SegmentStream::single(Broken, 100);
        stream.seek_offset(10).expect("seek");
        let mut buf = [0_u8; 8];
        let err = stream.read_buffer(&io, &mut buf).expect_err("broken");
        assert!(err.is_io());
        assert!(err.to_string().starts_with("read segment data: "));
        assert_eq!(stream.offset(), 10);
    }

    #[test]
    fn std_io_adaptor_reads_and_seeks() {
        let io = MemoryByteDevice::default();
        let mut stream = three_segments();
        let mut reader = stream.reader(&io);

        let mut all = Vec::new();
        reader.read_to_end(&mut all).expect("read_to_end");
        assert_eq!(all.len(), 20);

        assert_eq!(reader.seek(SeekFrom::End(-10)).expect("seek"), 10);
        let mut word = [0_u8; 9];
        reader.read_exact(&mut word).expect("read_exact");
        assert_eq!(&word, b"segmented");
        assert_eq!(reader.seek(SeekFrom::Current(-3)).expect("seek"), 16);
        assert!(reader.seek(SeekFrom::Current(-100)).is_err());
    }
}
