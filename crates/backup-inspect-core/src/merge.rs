//! K-way merge of versioned iterators.
//!
//! [`MultiIterator`] presents several already-ordered [`MvccIterator`]s as a
//! single one, using a min-heap keyed on each source's current version.
//! Identical `(key, timestamp)` pairs from different sources are not
//! deduplicated; they come out in source order (lower index first).

use std::{cmp::Reverse, collections::BinaryHeap};

use bytes::Bytes;

use crate::mvcc::{IterResult, MvccIterator, MvccKey};

/// Heap entry. Owns the sort key for `Ord`.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct HeapEntry {
    key: MvccKey,
    source: usize,
}

/// Merged view over several sources.
pub struct MultiIterator<I> {
    sources: Vec<I>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
}

impl<I: MvccIterator> MultiIterator<I> {
    /// Merge `sources`. The result is unpositioned until
    /// [`MvccIterator::seek_ge`] is called.
    pub fn new(sources: Vec<I>) -> Self {
        let heap = BinaryHeap::with_capacity(sources.len());
        Self { sources, heap }
    }

    fn push_if_valid(&mut self, source: usize) {
        if let Some(key) = self.sources[source].key() {
            self.heap.push(Reverse(HeapEntry {
                key: key.clone(),
                source,
            }));
        }
    }
}

impl<I: MvccIterator> MvccIterator for MultiIterator<I> {
    fn seek_ge(&mut self, target: &MvccKey) -> IterResult<()> {
        self.heap.clear();
        for source in 0..self.sources.len() {
            self.sources[source].seek_ge(target)?;
            self.push_if_valid(source);
        }
        Ok(())
    }

    fn key(&self) -> Option<&MvccKey> {
        self.heap.peek().map(|Reverse(e)| &e.key)
    }

    fn value(&self) -> Option<&Bytes> {
        let Reverse(top) = self.heap.peek()?;
        self.sources[top.source].value()
    }

    fn next(&mut self) -> IterResult<()> {
        if let Some(Reverse(top)) = self.heap.pop() {
            self.sources[top.source].next()?;
            self.push_if_valid(top.source);
        }
        Ok(())
    }

    fn next_key(&mut self) -> IterResult<()> {
        let Some(current) = self.key().map(|k| k.key.clone()) else {
            return Ok(());
        };
        while let Some(Reverse(top)) = self.heap.peek() {
            if top.key.key != current {
                break;
            }
            let source = top.source;
            self.heap.pop();
            self.sources[source].next_key()?;
            self.push_if_valid(source);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        hlc::HlcTimestamp,
        sst::{SstError, SstIterator, SstWriter},
    };

    fn file(name: &str, entries: &[(&str, i64, &str)]) -> Result<SstIterator, SstError> {
        let mut w = SstWriter::new();
        for (k, wall, v) in entries {
            w.put(k.as_bytes(), HlcTimestamp::from_wall(*wall), v.as_bytes())?;
        }
        SstIterator::new(name, Bytes::from(w.finish()))
    }

    fn drain(it: &mut impl MvccIterator) -> IterResult<Vec<(Vec<u8>, i64, Vec<u8>)>> {
        let mut out = Vec::new();
        while let (Some(k), Some(v)) = (it.key(), it.value()) {
            out.push((k.key.to_vec(), k.ts.wall_time, v.to_vec()));
            it.next()?;
        }
        Ok(out)
    }

    #[test]
    fn merges_by_key_then_newest_first() -> Result<(), SstError> {
        let a = file("a", &[("k1", 1, "a1"), ("k3", 3, "a3")])?;
        let b = file("b", &[("k1", 5, "b5"), ("k2", 2, "b2")])?;
        let mut merged = MultiIterator::new(vec![a, b]);
        merged.seek_ge(&MvccKey::newest(&b""[..]))?;

        let out = drain(&mut merged)?;
        let order: Vec<(Vec<u8>, i64)> = out.into_iter().map(|(k, t, _)| (k, t)).collect();
        assert_eq!(
            order,
            vec![
                (b"k1".to_vec(), 5),
                (b"k1".to_vec(), 1),
                (b"k2".to_vec(), 2),
                (b"k3".to_vec(), 3),
            ]
        );
        Ok(())
    }

    #[test]
    fn next_key_skips_versions_in_every_source() -> Result<(), SstError> {
        let a = file("a", &[("k1", 4, ""), ("k1", 1, "x"), ("k2", 1, "y")])?;
        let b = file("b", &[("k1", 3, "z"), ("k3", 1, "w")])?;
        let mut merged = MultiIterator::new(vec![a, b]);
        merged.seek_ge(&MvccKey::newest(&b""[..]))?;

        merged.next_key()?;
        assert_eq!(merged.key().map(|k| k.key.to_vec()), Some(b"k2".to_vec()));
        merged.next_key()?;
        assert_eq!(merged.key().map(|k| k.key.to_vec()), Some(b"k3".to_vec()));
        merged.next_key()?;
        assert!(!merged.valid());
        Ok(())
    }

    #[test]
    fn identical_versions_keep_source_order() -> Result<(), SstError> {
        let a = file("a", &[("k", 1, "from-a")])?;
        let b = file("b", &[("k", 1, "from-b")])?;
        let mut merged = MultiIterator::new(vec![a, b]);
        merged.seek_ge(&MvccKey::newest(&b""[..]))?;
        let values: Vec<Vec<u8>> = drain(&mut merged)?.into_iter().map(|r| r.2).collect();
        assert_eq!(values, vec![b"from-a".to_vec(), b"from-b".to_vec()]);
        Ok(())
    }

    #[test]
    fn seek_positions_every_source() -> Result<(), SstError> {
        let a = file("a", &[("a", 1, ""), ("c", 1, "")])?;
        let b = file("b", &[("b", 1, ""), ("d", 1, "")])?;
        let mut merged = MultiIterator::new(vec![a, b]);
        merged.seek_ge(&MvccKey::newest(&b"b"[..]))?;
        let keys: Vec<Vec<u8>> = drain(&mut merged)?.into_iter().map(|r| r.0).collect();
        assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
        Ok(())
    }
}
