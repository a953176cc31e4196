//! Failure taxonomy shared by every layer of the crate.
//!
//! Each module owns its own SNAFU error enum (storage, manifest, chain,
//! entry, fetch, export) so context selectors stay close to the code that
//! attaches them. Callers that only need to classify a failure (for example
//! to pick an exit code or decide whether a retry at a higher level makes
//! sense) use [`ErrorKind`] via the `kind()` method every error exposes.

use std::fmt;

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A chain, table, schema, or manifest lookup came up empty.
    NotFound,
    /// Malformed user input: time strings, URIs, start keys, output format,
    /// or revision history requested on backups that did not retain it.
    InvalidArgument,
    /// The requested read time is not covered by the supplied backups.
    InvalidTimeRange,
    /// Connection, read, or write failure against the storage backend.
    StorageFailure,
    /// A data file, manifest, or row could not be decoded.
    DecodeFailure,
    /// The supplied manifests do not form a contiguous chain.
    ChainIntegrityFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::InvalidTimeRange => "invalid time range",
            ErrorKind::StorageFailure => "storage failure",
            ErrorKind::DecodeFailure => "decode failure",
            ErrorKind::ChainIntegrityFailure => "chain integrity failure",
        };
        f.write_str(s)
    }
}
