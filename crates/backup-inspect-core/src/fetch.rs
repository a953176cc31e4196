//! Time-bounded reads over a merged version iterator.
//!
//! [`BackupKvFetcher`] applies one of two policies to the versions produced
//! by an [`MvccIterator`] within a key span:
//!
//! - point in time: the newest version at or before `end_time` of each key,
//!   skipping keys whose newest such version is a tombstone;
//! - revision history: every version in `(start_time, end_time]`,
//!   tombstones included.
//!
//! [`RowFetcher`] decodes what the fetcher yields into table rows. Both are
//! single-pass; build a new iterator to scan again.

use bytes::Bytes;
use log::trace;
use snafu::prelude::*;

use crate::{
    error::ErrorKind,
    hlc::HlcTimestamp,
    keys::{Key, Span},
    mvcc::{MvccIterator, MvccKey},
    rowenc::{DecodedRow, RowDecodeError, RowDecoder},
    sst::SstError,
};

/// Errors produced while fetching rows.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FetchError {
    /// A data file could not be read.
    #[snafu(display("scan failed: {source}"))]
    Scan {
        /// Underlying file error.
        source: SstError,
    },

    /// A version could not be decoded against the table schema.
    #[snafu(display("failed to decode {key}@{ts}: {source}"))]
    Decode {
        /// Key of the version.
        key: Key,
        /// Timestamp of the version.
        ts: HlcTimestamp,
        /// Underlying decode error.
        source: RowDecodeError,
    },
}

impl FetchError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Scan { source } => source.kind(),
            FetchError::Decode { source, .. } => source.kind(),
        }
    }
}

/// Yields the versions of a span that are visible under the chosen policy.
pub struct BackupKvFetcher<I> {
    iter: I,
    span: Span,
    start_time: HlcTimestamp,
    end_time: HlcTimestamp,
    with_revisions: bool,
    started: bool,
    done: bool,
}

impl<I: MvccIterator> BackupKvFetcher<I> {
    /// Fetch from `iter` within `span`.
    ///
    /// `start_time` is only used with `with_revisions`.
    pub fn new(
        iter: I,
        span: Span,
        start_time: HlcTimestamp,
        end_time: HlcTimestamp,
        with_revisions: bool,
    ) -> Self {
        Self {
            iter,
            span,
            start_time,
            end_time,
            with_revisions,
            started: false,
            done: false,
        }
    }

    fn current(&self) -> Option<(MvccKey, Bytes)> {
        let key = self.iter.key()?;
        if &key.key[..] >= self.span.end_key.as_bytes() {
            return None;
        }
        Some((key.clone(), self.iter.value()?.clone()))
    }

    fn next_visible(&mut self) -> Result<Option<(MvccKey, Bytes)>, SstError> {
        if !self.started {
            self.started = true;
            self.iter
                .seek_ge(&MvccKey::newest(self.span.key.as_bytes().to_vec()))?;
        }

        while let Some((key, value)) = self.current() {
            if key.ts > self.end_time {
                self.iter.next()?;
                continue;
            }

            if self.with_revisions {
                self.iter.next()?;
                if key.ts <= self.start_time {
                    continue;
                }
                return Ok(Some((key, value)));
            }

            // Newest visible version decides; older ones are shadowed.
            self.iter.next_key()?;
            if value.is_empty() {
                trace!("skipping deleted key {}", Key::from(&key.key[..]));
                continue;
            }
            return Ok(Some((key, value)));
        }
        Ok(None)
    }
}

impl<I: MvccIterator> Iterator for BackupKvFetcher<I> {
    type Item = Result<(MvccKey, Bytes), FetchError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_visible() {
            Ok(Some(kv)) => Some(Ok(kv)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(source) => {
                self.done = true;
                Some(Err(FetchError::Scan { source }))
            }
        }
    }
}

/// Decodes the versions of a [`BackupKvFetcher`] into rows.
///
/// The first decode failure is returned and ends the iteration.
pub struct RowFetcher<I> {
    kvs: BackupKvFetcher<I>,
    decoder: RowDecoder,
    failed: bool,
}

impl<I: MvccIterator> RowFetcher<I> {
    /// Decode rows from `kvs` with `decoder`.
    pub fn new(kvs: BackupKvFetcher<I>, decoder: RowDecoder) -> Self {
        Self {
            kvs,
            decoder,
            failed: false,
        }
    }

    /// The decoder in use.
    pub fn decoder(&self) -> &RowDecoder {
        &self.decoder
    }
}

impl<I: MvccIterator> Iterator for RowFetcher<I> {
    type Item = Result<DecodedRow, FetchError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = self.kvs.next()?.and_then(|(key, value)| {
            self.decoder
                .decode(&key.key, key.ts, &value)
                .context(DecodeSnafu {
                    key: Key::from(&key.key[..]),
                    ts: key.ts,
                })
        });
        self.failed = item.is_err();
        Some(item)
    }
}
