#![forbid(unsafe_code)]
//! Shared newtypes, format constants and byte-parsing helpers.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Fixed size of one compression block (and of the compressed chunks the
/// underlying stream is addressed in).
pub const COMPRESSED_BLOCK_SIZE: usize = 65536;

/// Smallest container block size accepted by [`BlockSize::new`].
pub const MIN_BLOCK_SIZE: u32 = 4096;

/// Largest container block size accepted by [`BlockSize::new`].
pub const MAX_BLOCK_SIZE: u32 = 65536;

/// Size of the common object header that prefixes every on-disk object.
pub const OBJECT_HEADER_SIZE: usize = 32;

/// Object type for a B-tree root node.
pub const OBJECT_TYPE_BTREE: u32 = 0x0000_0002;
/// Object type for a non-root B-tree node.
pub const OBJECT_TYPE_BTREE_NODE: u32 = 0x0000_0003;
/// Object subtype of the snapshot metadata tree.
pub const OBJECT_TYPE_SNAP_META_TREE: u32 = 0x0000_0010;
/// Mask selecting the type bits of the `type` header field.
pub const OBJECT_TYPE_MASK: u32 = 0x0000_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u64);

/// Byte offset on a `ByteDevice` (pread semantics).
///
/// This is a unit-carrying wrapper to prevent mixing bytes and blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ByteOffset(pub u64);

impl ByteOffset {
    pub const ZERO: Self = Self(0);

    /// Add a byte count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, bytes: u64) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }

    /// Multiply by a scalar, returning `None` on overflow.
    #[must_use]
    pub fn checked_mul(self, factor: u64) -> Option<Self> {
        self.0.checked_mul(factor).map(Self)
    }
}

/// Validated container block size (power of two in 4096..=65536).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockSize(u32);

impl BlockSize {
    /// Create a `BlockSize` if `value` is a power of two in [4096, 65536].
    pub fn new(value: u32) -> Result<Self, ParseError> {
        if !value.is_power_of_two() || !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&value) {
            return Err(ParseError::InvalidField {
                field: "block_size",
                reason: "must be power of two in 4096..=65536",
            });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    /// Block size as a buffer length.
    #[must_use]
    pub fn as_usize(self) -> usize {
        // Bounded by MAX_BLOCK_SIZE, so this never truncates.
        self.0 as usize
    }

    /// Number of bits to shift to convert between bytes and blocks.
    #[must_use]
    pub fn shift(self) -> u32 {
        self.0.trailing_zeros()
    }

    /// Convert a byte offset to a block number (truncating).
    #[must_use]
    pub fn byte_to_block(self, byte_offset: u64) -> BlockNumber {
        BlockNumber(byte_offset >> u64::from(self.shift()))
    }

    /// Convert a block number to a byte offset.
    #[must_use]
    pub fn block_to_byte(self, block: BlockNumber) -> Option<ByteOffset> {
        block.0.checked_mul(u64::from(self.0)).map(ByteOffset)
    }
}

impl Default for BlockSize {
    fn default() -> Self {
        Self(MIN_BLOCK_SIZE)
    }
}

/// Compression method of a compressed data stream.
///
/// The numeric identifiers are the ones stored in compressed-file metadata;
/// anything outside this closed set is rejected before a stream is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompressionMethod {
    /// Blocks are stored as-is.
    None,
    /// zlib-wrapped deflate blocks.
    Deflate,
    /// Apple LZVN blocks.
    Lzvn,
}

impl CompressionMethod {
    pub const NONE_ID: u32 = 0;
    pub const DEFLATE_ID: u32 = 1;
    pub const LZVN_ID: u32 = 2;

    #[must_use]
    pub fn id(self) -> u32 {
        match self {
            Self::None => Self::NONE_ID,
            Self::Deflate => Self::DEFLATE_ID,
            Self::Lzvn => Self::LZVN_ID,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Deflate => "deflate",
            Self::Lzvn => "lzvn",
        }
    }
}

impl TryFrom<u32> for CompressionMethod {
    type Error = ParseError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            Self::NONE_ID => Ok(Self::None),
            Self::DEFLATE_ID => Ok(Self::Deflate),
            Self::LZVN_ID => Ok(Self::Lzvn),
            _ => Err(ParseError::InvalidField {
                field: "compression_method",
                reason: "unsupported compression method",
            }),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_le_u64(data: &[u8], offset: usize) -> Result<u64, ParseError> {
    let bytes = ensure_slice(data, offset, 8)?;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ByteOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
