//! Ordered key-value store interface.
//!
//! The time-series engine never touches a storage format directly. Everything it
//! persists goes through [`KvStore`], which models an embedded store with:
//!
//! - snapshot-isolated reads with bounded, directional range iteration
//! - all-or-nothing batch writes
//! - per-entry time-to-live
//!
//! Two implementations ship with the crate: [`MemoryStore`] (copy-on-write,
//! ephemeral) and [`RedbStore`] (persistent, on top of `redb`). Expired entries are
//! hidden from reads as soon as their deadline passes and are physically removed by
//! [`KvStore::purge_expired`].

mod memory;
mod redb_store;

use std::ops::Bound;
use std::time::Duration;

use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redb_store::RedbStore;

/// Errors reported by a store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend itself failed (transaction, commit, table access).
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A stored entry does not have the expected envelope.
    #[error("corrupted entry: {0}")]
    Corrupted(String),

    /// IO error talking to the backing file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Wraps a backend-specific error.
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend(Box::new(err))
    }
}

/// A key/value pair yielded by a scan.
pub type Record = (Vec<u8>, Vec<u8>);

/// Iterator over the records of a scan.
pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<Record, StoreError>> + 'a>;

/// Iteration order of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Ascending key order.
    #[default]
    Forward,
    /// Descending key order.
    Reverse,
}

/// A range of raw byte keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    /// Lower bound.
    pub start: Bound<Vec<u8>>,
    /// Upper bound.
    pub end: Bound<Vec<u8>>,
}

impl KeyRange {
    /// Creates a range from explicit bounds.
    pub fn new(start: Bound<Vec<u8>>, end: Bound<Vec<u8>>) -> Self {
        Self { start, end }
    }

    /// Every key that starts with `prefix`.
    pub fn prefix(prefix: &[u8]) -> Self {
        let end = match prefix_successor(prefix) {
            Some(succ) => Bound::Excluded(succ),
            None => Bound::Unbounded,
        };
        Self {
            start: Bound::Included(prefix.to_vec()),
            end,
        }
    }

    /// Every key.
    pub fn full() -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Unbounded,
        }
    }

    /// Returns true if `key` lies inside the range.
    pub fn contains(&self, key: &[u8]) -> bool {
        let above_start = match &self.start {
            Bound::Included(s) => key >= s.as_slice(),
            Bound::Excluded(s) => key > s.as_slice(),
            Bound::Unbounded => true,
        };
        let below_end = match &self.end {
            Bound::Included(e) => key <= e.as_slice(),
            Bound::Excluded(e) => key < e.as_slice(),
            Bound::Unbounded => true,
        };
        above_start && below_end
    }

    /// Returns true if no key can fall inside the range.
    ///
    /// Backends must not hand such a range to an ordered map, which may panic on
    /// inverted bounds.
    pub fn is_empty(&self) -> bool {
        match (&self.start, &self.end) {
            (Bound::Unbounded, _) | (_, Bound::Unbounded) => false,
            (Bound::Included(s), Bound::Included(e)) => s > e,
            (Bound::Included(s) | Bound::Excluded(s), Bound::Excluded(e))
            | (Bound::Excluded(s), Bound::Included(e)) => s >= e,
        }
    }

    /// Borrows the bounds as slices.
    pub fn as_slices(&self) -> (Bound<&[u8]>, Bound<&[u8]>) {
        (as_slice_bound(&self.start), as_slice_bound(&self.end))
    }
}

fn as_slice_bound(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(k) => Bound::Included(k.as_slice()),
        Bound::Excluded(k) => Bound::Excluded(k.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// Returns the smallest key greater than every key starting with `prefix`.
///
/// `None` when no such key exists (empty prefix or all `0xff` bytes).
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut succ = prefix.to_vec();
    while let Some(last) = succ.pop() {
        if last < u8::MAX {
            succ.push(last + 1);
            return Some(succ);
        }
    }
    None
}

/// A single mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    /// Insert or overwrite a key, optionally expiring after `ttl`.
    Put {
        /// Raw key.
        key: Vec<u8>,
        /// Raw value.
        value: Vec<u8>,
        /// Time-to-live measured from commit.
        ttl: Option<Duration>,
    },
    /// Remove a key.
    Delete {
        /// Raw key.
        key: Vec<u8>,
    },
}

/// An ordered list of mutations committed all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty batch with room for `capacity` operations.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ops: Vec::with_capacity(capacity),
        }
    }

    /// Queues a put that never expires.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put {
            key,
            value,
            ttl: None,
        });
    }

    /// Queues a put that expires `ttl` after commit.
    pub fn put_with_ttl(&mut self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) {
        self.ops.push(BatchOp::Put {
            key,
            value,
            ttl: Some(ttl),
        });
    }

    /// Queues a delete.
    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete { key });
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Borrows the queued operations in order.
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}

impl IntoIterator for WriteBatch {
    type Item = BatchOp;
    type IntoIter = std::vec::IntoIter<BatchOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}

/// A consistent, read-only view of the store as of its creation.
pub trait Snapshot: Send + Sync {
    /// Reads a single key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Iterates every live record in `range` in the given direction.
    fn scan(&self, range: KeyRange, direction: Direction) -> Result<RecordIter<'_>, StoreError>;
}

/// An embedded ordered key-value store.
///
/// Implementations must order keys as raw byte strings, make [`write`](Self::write)
/// atomic, and give every snapshot a stable view that concurrent writes never alter.
pub trait KvStore: Send + Sync {
    /// Opens a snapshot of the current committed state.
    fn snapshot(&self) -> Result<Box<dyn Snapshot>, StoreError>;

    /// Commits every operation of `batch` or none of them.
    fn write(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Physically removes expired entries, returning how many were dropped.
    fn purge_expired(&self) -> Result<usize, StoreError>;

    /// Reads a single key from a fresh snapshot.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.snapshot()?.get(key)
    }

    /// Writes a single key.
    fn set(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut batch = WriteBatch::with_capacity(1);
        match ttl {
            Some(ttl) => batch.put_with_ttl(key.to_vec(), value.to_vec(), ttl),
            None => batch.put(key.to_vec(), value.to_vec()),
        }
        self.write(batch)
    }

    /// Deletes a single key.
    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        let mut batch = WriteBatch::with_capacity(1);
        batch.delete(key.to_vec());
        self.write(batch)
    }
}

/// Absolute expiry, in milliseconds since the Unix epoch, for a put committed at `now_ms`.
pub(crate) fn expiry_millis(now_ms: u64, ttl: Option<Duration>) -> Option<u64> {
    ttl.map(|ttl| now_ms.saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)))
}
