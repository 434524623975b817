#![forbid(unsafe_code)]
//! On-disk object parsing.
//!
//! Parses the common object header and exposes the snapshot metadata tree
//! as an opaque unit. B-tree node contents are left to the tree layer.

pub mod object;
pub mod snapshot;

pub use object::{BtreeNodeHeader, ObjectHeader};
pub use snapshot::SnapshotMetadataTree;

use afs_error::AfsError;
use afs_types::ParseError;

/// Convert a parse failure observed at `block` into a user-facing error.
///
/// Short reads of live metadata are treated as corruption; everything else
/// is a format error.
#[must_use]
pub fn parse_error_to_afs(err: &ParseError, block: u64) -> AfsError {
    match err {
        ParseError::InsufficientData { .. } | ParseError::IntegerConversion { .. } => {
            AfsError::Corruption {
                block,
                detail: err.to_string(),
            }
        }
        ParseError::InvalidField { .. } => AfsError::Format(err.to_string()),
    }
}
