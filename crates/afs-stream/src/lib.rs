#![forbid(unsafe_code)]
//! Read-only virtual streams over an APFS-style volume image.
//!
//! A [`SegmentStream`] drives a [`SegmentHandler`] backend. Two backends are
//! provided:
//!
//! - [`DataBlockHandle`] serves a file's extent list from the medium through
//!   the volume's shared block cache.
//! - [`CompressedDataHandle`] serves the uncompressed view of a stream of
//!   fixed-size compressed blocks, typically itself a data-block stream.

pub mod codec;
pub mod compressed;
pub mod data_block;
mod lzvn;
pub mod segment;
pub mod stream;
pub mod volume;

pub use codec::{compress, decompress};
pub use compressed::CompressedDataHandle;
pub use data_block::{DataBlockDescriptor, DataBlockFlags, DataBlockHandle, DataBlockVector};
pub use segment::{ReadFlags, Segment, SegmentFlags, SegmentHandler};
pub use stream::{DataStream, SegmentStream, StreamReader};
pub use volume::{IoHandle, StreamOptions, VolumeDataHandle};
