use std::path::Path;
use std::sync::Arc;

use redb::{AccessGuard, Database, ReadOnlyTable, ReadableTable, TableDefinition};

use super::{
    BatchOp, Direction, KeyRange, KvStore, Record, RecordIter, Snapshot, StoreError, WriteBatch,
    expiry_millis,
};
use crate::clock::{Clock, SystemClock};

const ENTRIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("seriesdb_entries");

/// Width of the expiry prefix stored in front of every value.
const ENVELOPE_LEN: usize = 8;

/// Persistent store backed by a single `redb` database file.
///
/// Every value is stored behind an 8-byte big-endian expiry timestamp in
/// milliseconds since the Unix epoch, with `0` meaning "never expires". Snapshots
/// are `redb` read transactions, and a [`WriteBatch`] maps to one write
/// transaction.
pub struct RedbStore {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl RedbStore {
    /// Opens or creates the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    /// Opens or creates the database file at `path`, evaluating expiry against `clock`.
    pub fn open_with_clock(
        path: impl AsRef<Path>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let db = Database::create(path).map_err(StoreError::backend)?;

        // Create the table up front so snapshots never see it missing.
        let txn = db.begin_write().map_err(StoreError::backend)?;
        txn.open_table(ENTRIES).map_err(StoreError::backend)?;
        txn.commit().map_err(StoreError::backend)?;

        #[cfg(feature = "logging")]
        log::info!("opened redb store at {}", path.display());

        Ok(Self { db, clock })
    }
}

impl KvStore for RedbStore {
    fn snapshot(&self) -> Result<Box<dyn Snapshot>, StoreError> {
        let txn = self.db.begin_read().map_err(StoreError::backend)?;
        let table = txn.open_table(ENTRIES).map_err(StoreError::backend)?;
        Ok(Box::new(RedbSnapshot {
            table,
            now_ms: self.clock.now_millis(),
        }))
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let now_ms = self.clock.now_millis();
        let txn = self.db.begin_write().map_err(StoreError::backend)?;
        {
            let mut table = txn.open_table(ENTRIES).map_err(StoreError::backend)?;
            for op in batch {
                match op {
                    BatchOp::Put { key, value, ttl } => {
                        let stored = seal(expiry_millis(now_ms, ttl), &value);
                        table
                            .insert(key.as_slice(), stored.as_slice())
                            .map_err(StoreError::backend)?;
                    }
                    BatchOp::Delete { key } => {
                        table.remove(key.as_slice()).map_err(StoreError::backend)?;
                    }
                }
            }
        }
        txn.commit().map_err(StoreError::backend)
    }

    fn purge_expired(&self) -> Result<usize, StoreError> {
        let now_ms = self.clock.now_millis();
        let txn = self.db.begin_write().map_err(StoreError::backend)?;
        let purged = {
            let mut table = txn.open_table(ENTRIES).map_err(StoreError::backend)?;

            let mut expired = Vec::new();
            for item in table.iter().map_err(StoreError::backend)? {
                let (key, value) = item.map_err(StoreError::backend)?;
                let (expires_at, _) = open_envelope(value.value())?;
                if !is_live(expires_at, now_ms) {
                    expired.push(key.value().to_vec());
                }
            }

            for key in &expired {
                table.remove(key.as_slice()).map_err(StoreError::backend)?;
            }
            expired.len()
        };
        txn.commit().map_err(StoreError::backend)?;

        #[cfg(feature = "logging")]
        if purged > 0 {
            log::debug!("redb store purged {purged} expired entries");
        }

        Ok(purged)
    }
}

struct RedbSnapshot {
    table: ReadOnlyTable<&'static [u8], &'static [u8]>,
    now_ms: u64,
}

impl Snapshot for RedbSnapshot {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let Some(guard) = self.table.get(key).map_err(StoreError::backend)? else {
            return Ok(None);
        };
        let (expires_at, payload) = open_envelope(guard.value())?;
        Ok(is_live(expires_at, self.now_ms).then(|| payload.to_vec()))
    }

    fn scan(&self, range: KeyRange, direction: Direction) -> Result<RecordIter<'_>, StoreError> {
        if range.is_empty() {
            return Ok(Box::new(std::iter::empty()));
        }

        let iter = self
            .table
            .range::<&[u8]>(range.as_slices())
            .map_err(StoreError::backend)?;

        let now_ms = self.now_ms;
        let live = move |item| live_record(item, now_ms);

        let records: RecordIter<'_> = match direction {
            Direction::Forward => Box::new(iter.filter_map(live)),
            Direction::Reverse => Box::new(iter.rev().filter_map(live)),
        };
        Ok(records)
    }
}

type RawEntry<'a> = (
    AccessGuard<'a, &'static [u8]>,
    AccessGuard<'a, &'static [u8]>,
);

fn live_record(
    item: Result<RawEntry<'_>, redb::StorageError>,
    now_ms: u64,
) -> Option<Result<Record, StoreError>> {
    let (key, value) = match item {
        Ok(entry) => entry,
        Err(e) => return Some(Err(StoreError::backend(e))),
    };
    match open_envelope(value.value()) {
        Ok((expires_at, payload)) => {
            is_live(expires_at, now_ms).then(|| Ok((key.value().to_vec(), payload.to_vec())))
        }
        Err(e) => Some(Err(e)),
    }
}

fn seal(expires_at: Option<u64>, value: &[u8]) -> Vec<u8> {
    let mut stored = Vec::with_capacity(ENVELOPE_LEN + value.len());
    stored.extend_from_slice(&expires_at.unwrap_or(0).to_be_bytes());
    stored.extend_from_slice(value);
    stored
}

fn open_envelope(stored: &[u8]) -> Result<(Option<u64>, &[u8]), StoreError> {
    let Some((header, payload)) = stored.split_first_chunk::<ENVELOPE_LEN>() else {
        return Err(StoreError::Corrupted(format!(
            "entry of {} bytes is shorter than its expiry header",
            stored.len()
        )));
    };
    let expires_at = u64::from_be_bytes(*header);
    Ok(((expires_at != 0).then_some(expires_at), payload))
}

fn is_live(expires_at: Option<u64>, now_ms: u64) -> bool {
    expires_at.is_none_or(|deadline| now_ms < deadline)
}
