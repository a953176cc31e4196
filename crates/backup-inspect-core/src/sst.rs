//! Sorted, immutable, versioned data files.
//!
//! Layout: the 6-byte header `BKSST\x01`, then records
//!
//! ```text
//! [key_len u32 LE][key][wall_time i64 LE][logical i32 LE][val_len u32 LE][value]
//! ```
//!
//! sorted by key ascending and timestamp descending. An empty value is a
//! tombstone. [`SstIterator`] parses records lazily and rejects files whose
//! records are out of order or truncated.

use bytes::Bytes;
use snafu::{Backtrace, prelude::*};

use crate::{
    error::ErrorKind,
    hlc::HlcTimestamp,
    keys::Key,
    mvcc::{IterResult, MvccIterator, MvccKey},
};

/// File header.
pub const SST_MAGIC: &[u8; 6] = b"BKSST\x01";

const FIXED_RECORD_LEN: usize = 4 + 8 + 4 + 4;

/// Errors produced while reading or writing data files.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SstError {
    /// The header does not match.
    #[snafu(display("{path}: not a data file (bad header)"))]
    BadMagic {
        /// File path.
        path: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// A record extends past the end of the file.
    #[snafu(display("{path}: truncated record at offset {offset}"))]
    TruncatedRecord {
        /// File path.
        path: String,
        /// Record start offset.
        offset: usize,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// A record does not sort after its predecessor.
    #[snafu(display("{path}: record {key}@{ts} at offset {offset} is out of order"))]
    OutOfOrder {
        /// File path, or `<writer>` when building.
        path: String,
        /// Offending key.
        key: Key,
        /// Offending timestamp.
        ts: HlcTimestamp,
        /// Record start offset.
        offset: usize,
    },
}

impl SstError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::DecodeFailure
    }
}

/// Builds a data file in memory.
#[derive(Debug)]
pub struct SstWriter {
    buf: Vec<u8>,
    last: Option<MvccKey>,
}

impl Default for SstWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl SstWriter {
    /// Empty file.
    pub fn new() -> Self {
        Self {
            buf: SST_MAGIC.to_vec(),
            last: None,
        }
    }

    /// Append a version. Versions must be added in iteration order.
    pub fn put(&mut self, key: &[u8], ts: HlcTimestamp, value: &[u8]) -> Result<(), SstError> {
        let mvcc = MvccKey::new(Bytes::copy_from_slice(key), ts);
        if let Some(last) = &self.last {
            ensure!(
                *last < mvcc,
                OutOfOrderSnafu {
                    path: "<writer>",
                    key: Key::from(key),
                    ts,
                    offset: self.buf.len(),
                }
            );
        }

        self.buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(key);
        self.buf.extend_from_slice(&ts.wall_time.to_le_bytes());
        self.buf.extend_from_slice(&ts.logical.to_le_bytes());
        self.buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(value);
        self.last = Some(mvcc);
        Ok(())
    }

    /// Append a tombstone.
    pub fn delete(&mut self, key: &[u8], ts: HlcTimestamp) -> Result<(), SstError> {
        self.put(key, ts, &[])
    }

    /// Finish and return the encoded file.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Lazy iterator over one data file.
#[derive(Debug)]
pub struct SstIterator {
    path: String,
    data: Bytes,
    /// Offset of the record after the current one.
    next_offset: usize,
    current: Option<(MvccKey, Bytes)>,
}

impl SstIterator {
    /// Open `data`, read from `path` (used in error messages).
    pub fn new(path: impl Into<String>, data: Bytes) -> Result<Self, SstError> {
        let path = path.into();
        ensure!(data.starts_with(SST_MAGIC), BadMagicSnafu { path });
        Ok(Self {
            path,
            data,
            next_offset: SST_MAGIC.len(),
            current: None,
        })
    }

    /// Path the file was read from.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn read_u32(&self, at: usize) -> Option<u32> {
        Some(u32::from_le_bytes(self.data.get(at..at + 4)?.try_into().ok()?))
    }

    fn parse_at(&self, offset: usize) -> Option<(MvccKey, Bytes, usize)> {
        let key_len = self.read_u32(offset)? as usize;
        let key_start = offset + 4;
        let ts_start = key_start.checked_add(key_len)?;
        let wall = i64::from_le_bytes(self.data.get(ts_start..ts_start + 8)?.try_into().ok()?);
        let logical =
            i32::from_le_bytes(self.data.get(ts_start + 8..ts_start + 12)?.try_into().ok()?);
        let val_len = self.read_u32(ts_start + 12)? as usize;
        let val_start = ts_start + 16;
        let end = val_start.checked_add(val_len)?;
        if end > self.data.len() {
            return None;
        }
        let key = MvccKey::new(
            self.data.slice(key_start..ts_start),
            HlcTimestamp::new(wall, logical),
        );
        Some((key, self.data.slice(val_start..end), end))
    }

    fn advance(&mut self) -> IterResult<()> {
        let offset = self.next_offset;
        if offset >= self.data.len() {
            self.current = None;
            return Ok(());
        }
        if self.data.len() - offset < FIXED_RECORD_LEN {
            return TruncatedRecordSnafu {
                path: self.path.clone(),
                offset,
            }
            .fail();
        }

        let (key, value, end) = self.parse_at(offset).context(TruncatedRecordSnafu {
            path: self.path.clone(),
            offset,
        })?;

        if let Some((prev, _)) = &self.current {
            ensure!(
                *prev < key,
                OutOfOrderSnafu {
                    path: self.path.clone(),
                    key: Key::from(&key.key[..]),
                    ts: key.ts,
                    offset,
                }
            );
        }

        self.current = Some((key, value));
        self.next_offset = end;
        Ok(())
    }
}

impl MvccIterator for SstIterator {
    fn seek_ge(&mut self, target: &MvccKey) -> IterResult<()> {
        self.next_offset = SST_MAGIC.len();
        self.current = None;
        self.advance()?;
        while self.current.as_ref().is_some_and(|(k, _)| k < target) {
            self.advance()?;
        }
        Ok(())
    }

    fn key(&self) -> Option<&MvccKey> {
        self.current.as_ref().map(|(k, _)| k)
    }

    fn value(&self) -> Option<&Bytes> {
        self.current.as_ref().map(|(_, v)| v)
    }

    fn next(&mut self) -> IterResult<()> {
        if self.current.is_some() {
            self.advance()?;
        }
        Ok(())
    }
}
