use std::{error::Error, fmt, io};

use snafu::{Backtrace, prelude::*};

use crate::error::ErrorKind;

/// Errors produced by the storage backend implementation.
///
/// Only the local filesystem backend exists today; backend-specific I/O
/// errors are wrapped in this enum so higher layers can map them into
/// [`StorageError`] variants with additional context.
#[derive(Debug)]
pub enum BackendError {
    /// A local filesystem I/O error.
    Local(io::Error),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Local(e) => write!(f, "local I/O error: {e}"),
        }
    }
}

impl Error for BackendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BackendError::Local(e) => Some(e),
        }
    }
}

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    /// The specified path was not found.
    #[snafu(display("Path not found: {path}"))]
    NotFound {
        /// The path that was not found.
        path: String,
        /// Underlying backend error that caused the failure.
        source: BackendError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// An I/O error occurred on the backend.
    #[snafu(display("I/O error at {path}: {source}"))]
    OtherIo {
        /// The path where the I/O error occurred.
        path: String,
        /// Underlying backend I/O error with platform-specific details.
        source: BackendError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The location string could not be parsed.
    #[snafu(display("Invalid storage URI {uri:?}: {reason}"))]
    InvalidUri {
        /// The rejected location string.
        uri: String,
        /// Why it was rejected.
        reason: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The URI names a scheme without a backend.
    #[snafu(display("Unsupported storage scheme {scheme:?} in {uri}"))]
    UnsupportedScheme {
        /// The full URI.
        uri: String,
        /// The scheme that has no backend.
        scheme: String,
    },

    /// `nodelocal://` URIs can only address the local node.
    #[snafu(display(
        "accessing node {host:?} is unsupported for backup inspection; \
         only local access is supported with nodelocal://self"
    ))]
    RemoteNode {
        /// The host component that was requested.
        host: String,
    },
}

impl StorageError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::NotFound { .. } | StorageError::OtherIo { .. } => {
                ErrorKind::StorageFailure
            }
            StorageError::InvalidUri { .. }
            | StorageError::UnsupportedScheme { .. }
            | StorageError::RemoteNode { .. } => ErrorKind::InvalidArgument,
        }
    }

    /// True when the failure is a missing object rather than a broken backend.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}
