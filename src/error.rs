//! Error hierarchy for the cram core.
//!
//! Every fallible operation in this crate returns [`Result`], whose error
//! variants mirror the failure kinds named by the on-disk format's
//! consistency checks. Nothing here is retried or logged internally —
//! callers (and the CLI) decide what to do with a propagated error.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong reading or writing a cramfile.
#[derive(Debug, Error)]
pub enum Error {
    /// The first four bytes of the file are not the cram magic number.
    #[error("not a cramfile (bad magic number)")]
    BadMagic,

    /// The header declares a format version this crate does not read.
    #[error("version mismatch: file has version {found}, this crate reads version 2")]
    VersionMismatch {
        /// Version found in the file's header.
        found: u32,
    },

    /// The stream ended before a requested read completed.
    #[error("short read: stream ended before the requested bytes were available")]
    ShortRead,

    /// A record's declared `record_size_bytes` did not match the number of
    /// bytes actually decoded for it.
    #[error("corrupt record: header declared {expected} bytes, decoded {actual}")]
    CorruptRecord {
        /// The `record_size_bytes` field read from the record header.
        expected: u32,
        /// The number of bytes actually consumed while decoding the record.
        actual: u64,
    },

    /// A value does not fit in the integer width the format requires.
    #[error("integer overflow: value does not fit in the required encoding width")]
    IntegerOverflow,

    /// A read operation was attempted on a write/append container, or vice
    /// versa.
    #[error("invalid operation: container is not open for {expected}")]
    ModeViolation {
        /// The mode the operation required (e.g. `"reading"`, `"writing"`).
        expected: &'static str,
    },

    /// An underlying I/O error from the stream.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
