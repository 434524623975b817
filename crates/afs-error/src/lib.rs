#![forbid(unsafe_code)]
//! Error types for afs.
//!
//! # Error Taxonomy
//!
//! | Kind | Variants | When |
//! |------|----------|------|
//! | Argument | `InvalidArgument`, `OutOfBounds`, `AlreadySet`, `UnsupportedCompression` | Rejected before any state changes or I/O |
//! | I/O | `Io` | The backing medium failed or was too short |
//! | Decode | `Decode` | A codec rejected malformed or truncated compressed input |
//! | Format | `Corruption`, `Format`, `Parse` | On-disk structures are inconsistent |
//!
//! I/O and decode failures are kept apart so callers can tell "medium
//! unreadable" from "content corrupt". Nothing in the stream layer retries
//! or logs a failure; each layer wraps the error with the name of the
//! operation that failed ([`AfsError::context`]) and returns it.
//! [`AfsError::root`] sees through any number of context layers.
//!
//! ## errno Mapping
//!
//! | Variant | errno |
//! |---------|-------|
//! | `Io` | raw OS error, else `EIO` |
//! | `Decode` | `EIO` |
//! | `Corruption` | `EIO` |
//! | `InvalidArgument` | `EINVAL` |
//! | `OutOfBounds` | `EINVAL` |
//! | `AlreadySet` | `EEXIST` |
//! | `UnsupportedCompression` | `EOPNOTSUPP` |
//! | `Format` | `EINVAL` |
//! | `Parse` | `EINVAL` |
//! | `Context` | errno of the wrapped error |

use thiserror::Error;

/// Unified error type for all afs operations.
#[derive(Debug, Error)]
pub enum AfsError {
    /// Operating system I/O error (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A codec rejected its input.
    #[error("{method} decode failed: {detail}")]
    Decode {
        method: &'static str,
        detail: String,
    },

    /// Caller passed an unusable argument (oversized request, bad geometry).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An index or offset falls outside the range the callee serves.
    #[error("value out of bounds: {0}")]
    OutOfBounds(String),

    /// Initialization target already holds a value.
    #[error("value already set: {0}")]
    AlreadySet(&'static str),

    /// Compression method identifier outside the supported set.
    #[error("unsupported compression method: {0}")]
    UnsupportedCompression(u32),

    /// On-disk metadata corruption detected at a known block.
    #[error("corrupt metadata at block {block}: {detail}")]
    Corruption { block: u64, detail: String },

    /// Structurally invalid on-disk format.
    #[error("invalid on-disk format: {0}")]
    Format(String),

    /// Parse-layer error surfaced to the user.
    ///
    /// Carries the string form of an `afs_types::ParseError`.
    #[error("parse error: {0}")]
    Parse(String),

    /// Failure annotated with the operation that observed it.
    #[error("{op}: {source}")]
    Context {
        op: &'static str,
        #[source]
        source: Box<AfsError>,
    },
}

impl AfsError {
    /// Wrap this error with the name of the failing operation.
    #[must_use]
    pub fn context(self, op: &'static str) -> Self {
        Self::Context {
            op,
            source: Box::new(self),
        }
    }

    /// The innermost error beneath any context layers.
    #[must_use]
    pub fn root(&self) -> &Self {
        let mut err = self;
        while let Self::Context { source, .. } = err {
            err = source;
        }
        err
    }

    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self.root(), Self::Io(_))
    }

    #[must_use]
    pub fn is_decode(&self) -> bool {
        matches!(self.root(), Self::Decode { .. })
    }

    /// True for errors raised by argument validation.
    #[must_use]
    pub fn is_argument(&self) -> bool {
        matches!(
            self.root(),
            Self::InvalidArgument(_)
                | Self::OutOfBounds(_)
                | Self::AlreadySet(_)
                | Self::UnsupportedCompression(_)
        )
    }

    /// Convert this error into a POSIX errno.
    ///
    /// The mapping is exhaustive so adding a variant forces a decision here.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::Decode { .. } | Self::Corruption { .. } => libc::EIO,
            Self::InvalidArgument(_)
            | Self::OutOfBounds(_)
            | Self::Format(_)
            | Self::Parse(_) => libc::EINVAL,
            Self::AlreadySet(_) => libc::EEXIST,
            Self::UnsupportedCompression(_) => libc::EOPNOTSUPP,
            Self::Context { source, .. } => source.to_errno(),
        }
    }
}

/// Attach operation context to a `Result`.
pub trait ResultExt<T> {
    fn context(self, op: &'static str) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, op: &'static str) -> Result<T> {
        self.map_err(|err| err.context(op))
    }
}

/// Result alias using `AfsError`.
pub type Result<T> = std::result::Result<T, AfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_covers_all_variants() {
        let cases: Vec<(AfsError, libc::c_int)> = vec![
            (AfsError::Io(std::io::Error::other("test")), libc::EIO),
            (
                AfsError::Decode {
                    method: "deflate",
                    detail: "bad".into(),
                },
                libc::EIO,
            ),
            (AfsError::InvalidArgument("test".into()), libc::EINVAL),
            (AfsError::OutOfBounds("test".into()), libc::EINVAL),
            (AfsError::AlreadySet("handle"), libc::EEXIST),
            (AfsError::UnsupportedCompression(9), libc::EOPNOTSUPP),
            (
                AfsError::Corruption {
                    block: 0,
                    detail: "test".into(),
                },
                libc::EIO,
            ),
            (AfsError::Format("test".into()), libc::EINVAL),
            (AfsError::Parse("test".into()), libc::EINVAL),
            (
                AfsError::OutOfBounds("segment index".into()).context("seek_segment_offset"),
                libc::EINVAL,
            ),
        ];

        for (error, expected_errno) in &cases {
            assert_eq!(
                error.to_errno(),
                *expected_errno,
                "wrong errno for {error:?}",
            );
        }
    }

    #[test]
    fn io_error_preserves_raw_os_error() {
        let raw = std::io::Error::from_raw_os_error(libc::EPERM);
        let err = AfsError::Io(raw).context("read_block");
        assert_eq!(err.to_errno(), libc::EPERM);
    }

    #[test]
    fn context_is_transparent_to_classification() {
        let err = AfsError::Decode {
            method: "lzvn",
            detail: "undefined opcode 0x70".into(),
        }
        .context("decompress")
        .context("read_segment_data");

        assert!(err.is_decode());
        assert!(!err.is_io());
        assert!(matches!(err.root(), AfsError::Decode { method: "lzvn", .. }));
        assert_eq!(
            err.to_string(),
            "read_segment_data: decompress: lzvn decode failed: undefined opcode 0x70"
        );

        let io: Result<()> = Err(std::io::Error::other("gone").into());
        let io = io.context("read_buffer_at_offset").unwrap_err();
        assert!(io.is_io());
        assert!(!io.is_argument());
    }

    #[test]
    fn display_formatting() {
        assert_eq!(
            AfsError::UnsupportedCompression(3).to_string(),
            "unsupported compression method: 3"
        );
        assert_eq!(
            AfsError::AlreadySet("data handle").to_string(),
            "value already set: data handle"
        );
        let err = AfsError::Corruption {
            block: 42,
            detail: "bad object type".into(),
        };
        assert_eq!(err.to_string(), "corrupt metadata at block 42: bad object type");
    }
}
