//! Versioned keys and the iterator interface over them.
//!
//! Versions are ordered by key ascending and, for equal keys, by timestamp
//! descending, so the newest version of a key is seen first.

use std::cmp::Ordering;

use bytes::Bytes;

use crate::{hlc::HlcTimestamp, sst::SstError};

/// A key at a specific version.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MvccKey {
    /// User key.
    pub key: Bytes,
    /// Version timestamp.
    pub ts: HlcTimestamp,
}

impl MvccKey {
    /// Build a versioned key.
    pub fn new(key: impl Into<Bytes>, ts: HlcTimestamp) -> Self {
        Self {
            key: key.into(),
            ts,
        }
    }

    /// The first version of `key` in iteration order.
    pub fn newest(key: impl Into<Bytes>) -> Self {
        Self::new(key, HlcTimestamp::new(i64::MAX, i32::MAX))
    }
}

impl Ord for MvccKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| other.ts.cmp(&self.ts))
    }
}

impl PartialOrd for MvccKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Result type of iterator positioning calls.
pub type IterResult<T> = Result<T, SstError>;

/// A positioned cursor over versioned key-value pairs.
///
/// A fresh iterator is unpositioned; call [`MvccIterator::seek_ge`] first.
/// Values are empty for tombstones.
pub trait MvccIterator {
    /// Position at the first version `>= target`.
    fn seek_ge(&mut self, target: &MvccKey) -> IterResult<()>;

    /// Current versioned key, or `None` when exhausted.
    fn key(&self) -> Option<&MvccKey>;

    /// Current value, or `None` when exhausted.
    fn value(&self) -> Option<&Bytes>;

    /// Advance to the next version.
    fn next(&mut self) -> IterResult<()>;

    /// Advance past every remaining version of the current key.
    fn next_key(&mut self) -> IterResult<()> {
        let Some(current) = self.key().map(|k| k.key.clone()) else {
            return Ok(());
        };
        self.next()?;
        while self.key().is_some_and(|k| k.key == current) {
            self.next()?;
        }
        Ok(())
    }

    /// True while positioned on a version.
    fn valid(&self) -> bool {
        self.key().is_some()
    }
}

impl<I: MvccIterator + ?Sized> MvccIterator for Box<I> {
    fn seek_ge(&mut self, target: &MvccKey) -> IterResult<()> {
        (**self).seek_ge(target)
    }

    fn key(&self) -> Option<&MvccKey> {
        (**self).key()
    }

    fn value(&self) -> Option<&Bytes> {
        (**self).value()
    }

    fn next(&mut self) -> IterResult<()> {
        (**self).next()
    }

    fn next_key(&mut self) -> IterResult<()> {
        (**self).next_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_versions_sort_first() {
        let a_new = MvccKey::new(&b"a"[..], HlcTimestamp::from_wall(9));
        let a_old = MvccKey::new(&b"a"[..], HlcTimestamp::from_wall(1));
        let b = MvccKey::new(&b"b"[..], HlcTimestamp::from_wall(100));
        assert!(a_new < a_old);
        assert!(a_old < b);
        assert!(MvccKey::newest(&b"a"[..]) < a_new);
    }
}
