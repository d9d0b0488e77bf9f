//! Series dictionary: one metadata entry per distinct (measurement, label set).

use serde::{Deserialize, Serialize};

use crate::codec::{self, Labels, SeriesMeta};
use crate::error::Result;
use crate::store::{Direction, KeyRange, Snapshot};

/// A series as listed from the dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    /// The series' label set.
    pub labels: Labels,
    /// Fingerprint of the canonical label set.
    pub fingerprint: u64,
    /// Number of points ever written to the series.
    pub counter: u64,
}

/// Reads the metadata stored under a dictionary key.
pub(crate) fn read_meta(snapshot: &dyn Snapshot, key: &[u8]) -> Result<Option<SeriesMeta>> {
    match snapshot.get(key)? {
        Some(bytes) => Ok(Some(SeriesMeta::decode(&bytes)?)),
        None => Ok(None),
    }
}

/// Computes the metadata to store after `added` more points joined the series.
///
/// Reads the persisted counter so history from earlier calls is kept; the
/// caller must hold the key's exclusive lock from this read until its batch
/// commits.
pub(crate) fn next_meta(
    snapshot: &dyn Snapshot,
    key: &[u8],
    fingerprint: u64,
    added: u64,
) -> Result<SeriesMeta> {
    let counter = match read_meta(snapshot, key)? {
        Some(meta) => meta.counter.saturating_add(added),
        None => added,
    };
    Ok(SeriesMeta {
        fingerprint,
        counter,
    })
}

/// Lists every series of `measurement` in canonical label order.
pub(crate) fn list(snapshot: &dyn Snapshot, measurement: &str) -> Result<Vec<Series>> {
    let prefix = codec::dictionary_prefix(measurement)?;
    let mut series = Vec::new();
    for item in snapshot.scan(KeyRange::prefix(&prefix), Direction::Forward)? {
        let (key, value) = item?;
        let (_, labels) = codec::decode_dictionary_key(&key)?;
        let meta = SeriesMeta::decode(&value)?;
        series.push(Series {
            labels,
            fingerprint: meta.fingerprint,
            counter: meta.counter,
        });
    }
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CanonicalLabels;
    use crate::store::{KvStore, MemoryStore};

    #[test]
    fn test_next_meta_accumulates_persisted_counter() {
        let store = MemoryStore::new();
        let mut labels = Labels::new();
        labels.insert("host".to_string(), "a".to_string());
        let canonical = CanonicalLabels::new(&labels).unwrap();
        let key = codec::dictionary_key("cpu", &canonical).unwrap();

        let snap = store.snapshot().unwrap();
        let first = next_meta(snap.as_ref(), &key, canonical.fingerprint(), 3).unwrap();
        assert_eq!(first.counter, 3);
        store.set(&key, &first.encode(), None).unwrap();

        let snap = store.snapshot().unwrap();
        let second = next_meta(snap.as_ref(), &key, canonical.fingerprint(), 2).unwrap();
        assert_eq!(second.counter, 5);
        assert_eq!(second.fingerprint, canonical.fingerprint());
    }

    #[test]
    fn test_list_is_scoped_to_measurement() {
        let store = MemoryStore::new();
        for (measurement, host) in [("cpu", "b"), ("cpu", "a"), ("cpu2", "c")] {
            let mut labels = Labels::new();
            labels.insert("host".to_string(), host.to_string());
            let canonical = CanonicalLabels::new(&labels).unwrap();
            let key = codec::dictionary_key(measurement, &canonical).unwrap();
            let meta = SeriesMeta {
                fingerprint: canonical.fingerprint(),
                counter: 1,
            };
            store.set(&key, &meta.encode(), None).unwrap();
        }

        let snap = store.snapshot().unwrap();
        let listed = list(snap.as_ref(), "cpu").unwrap();
        let hosts: Vec<_> = listed.iter().map(|s| s.labels["host"].as_str()).collect();
        assert_eq!(hosts, vec!["a", "b"]);
    }
}
