use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use super::{
    BatchOp, Direction, KeyRange, KvStore, Record, RecordIter, Snapshot, StoreError,
    WriteBatch, expiry_millis,
};
use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone)]
struct Entry {
    value: Arc<[u8]>,
    /// Milliseconds since the Unix epoch after which the entry is dead.
    expires_at: Option<u64>,
}

impl Entry {
    fn is_live(&self, now_ms: u64) -> bool {
        self.expires_at.is_none_or(|deadline| now_ms < deadline)
    }
}

type Tree = BTreeMap<Vec<u8>, Entry>;

/// Ephemeral in-process store.
///
/// The committed state is an immutable ordered map published through an
/// [`ArcSwap`]. A snapshot is a reference to one published map, so readers never
/// wait on writers and never observe a later commit. Writers serialize on a mutex,
/// apply the whole batch to a private copy, and publish it in one swap, which makes
/// every batch atomic.
///
/// Each write copies the whole map, so one write costs O(n) in the number of
/// stored entries and filling the store one point at a time costs O(n²). It
/// suits tests, caches and working sets of up to a few hundred thousand keys
/// written in large batches. Use [`RedbStore`](super::RedbStore) for larger or
/// durable data.
pub struct MemoryStore {
    current: ArcSwap<Tree>,
    writer: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Creates an empty store driven by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty store that evaluates expiry against `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            current: ArcSwap::from_pointee(Tree::new()),
            writer: Mutex::new(()),
            clock,
        }
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    /// Returns true if the store holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemoryStore {
    fn snapshot(&self) -> Result<Box<dyn Snapshot>, StoreError> {
        Ok(Box::new(MemorySnapshot {
            tree: self.current.load_full(),
            now_ms: self.clock.now_millis(),
        }))
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let _writer = self.writer.lock();
        let now_ms = self.clock.now_millis();
        let mut next = Tree::clone(&self.current.load());

        for op in batch {
            match op {
                BatchOp::Put { key, value, ttl } => {
                    next.insert(
                        key,
                        Entry {
                            value: value.into(),
                            expires_at: expiry_millis(now_ms, ttl),
                        },
                    );
                }
                BatchOp::Delete { key } => {
                    next.remove(&key);
                }
            }
        }

        self.current.store(Arc::new(next));
        Ok(())
    }

    fn purge_expired(&self) -> Result<usize, StoreError> {
        let _writer = self.writer.lock();
        let now_ms = self.clock.now_millis();
        let current = self.current.load_full();

        let expired = current.values().filter(|e| !e.is_live(now_ms)).count();
        if expired == 0 {
            return Ok(0);
        }

        let mut next = Tree::clone(&current);
        next.retain(|_, entry| entry.is_live(now_ms));
        self.current.store(Arc::new(next));

        #[cfg(feature = "logging")]
        log::debug!("memory store purged {expired} expired entries");

        Ok(expired)
    }
}

struct MemorySnapshot {
    tree: Arc<Tree>,
    now_ms: u64,
}

impl Snapshot for MemorySnapshot {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .tree
            .get(key)
            .filter(|entry| entry.is_live(self.now_ms))
            .map(|entry| entry.value.to_vec()))
    }

    fn scan(&self, range: KeyRange, direction: Direction) -> Result<RecordIter<'_>, StoreError> {
        if range.is_empty() {
            return Ok(Box::new(std::iter::empty()));
        }

        let now_ms = self.now_ms;
        let live = move |(key, entry): (&Vec<u8>, &Entry)| -> Option<Result<Record, StoreError>> {
            entry
                .is_live(now_ms)
                .then(|| Ok((key.clone(), entry.value.to_vec())))
        };

        let iter = self.tree.range::<[u8], _>(range.as_slices());
        let records: RecordIter<'_> = match direction {
            Direction::Forward => Box::new(iter.filter_map(live)),
            Direction::Reverse => Box::new(iter.rev().filter_map(live)),
        };
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use std::ops::Bound;
    use std::time::Duration;

    fn keys(iter: RecordIter<'_>) -> Vec<Vec<u8>> {
        iter.map(|r| r.unwrap().0).collect()
    }

    #[test]
    fn test_put_get_delete() {
        let store = MemoryStore::new();
        store.set(b"a", b"1", None).unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));

        store.delete(b"a").unwrap();
        assert_eq!(store.get(b"a").unwrap(), None);
    }

    #[test]
    fn test_scan_directions() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        for k in [b"k1", b"k3", b"k2", b"x1"] {
            batch.put(k.to_vec(), b"v".to_vec());
        }
        store.write(batch).unwrap();

        let snap = store.snapshot().unwrap();
        let forward = keys(snap.scan(KeyRange::prefix(b"k"), Direction::Forward).unwrap());
        assert_eq!(forward, vec![b"k1".to_vec(), b"k2".to_vec(), b"k3".to_vec()]);

        let reverse = keys(snap.scan(KeyRange::prefix(b"k"), Direction::Reverse).unwrap());
        assert_eq!(reverse, vec![b"k3".to_vec(), b"k2".to_vec(), b"k1".to_vec()]);

        let inverted = KeyRange::new(Bound::Included(b"z".to_vec()), Bound::Included(b"a".to_vec()));
        assert!(keys(snap.scan(inverted, Direction::Forward).unwrap()).is_empty());
    }

    #[test]
    fn test_snapshot_isolation() {
        let store = MemoryStore::new();
        store.set(b"a", b"1", None).unwrap();

        let snap = store.snapshot().unwrap();
        store.set(b"a", b"2", None).unwrap();
        store.set(b"b", b"3", None).unwrap();

        assert_eq!(snap.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(snap.get(b"b").unwrap(), None);
        assert_eq!(store.get(b"a").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_ttl_hides_and_purges() {
        let clock = Arc::new(MockClock::new());
        let store = MemoryStore::with_clock(clock.clone());

        store.set(b"short", b"1", Some(Duration::from_secs(10))).unwrap();
        store.set(b"forever", b"2", None).unwrap();

        clock.advance(Duration::from_secs(5));
        assert!(store.get(b"short").unwrap().is_some());

        clock.advance(Duration::from_secs(6));
        assert!(store.get(b"short").unwrap().is_none());
        assert_eq!(store.len(), 2);

        assert_eq!(store.purge_expired().unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get(b"forever").unwrap().is_some());
    }
}
