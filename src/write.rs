//! Write path: validation, encoding, dictionary maintenance and commit.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::codec::{self, CanonicalLabels};
use crate::error::{Error, Result};
use crate::lock::KeyLock;
use crate::point::Point;
use crate::series;
use crate::store::{KvStore, WriteBatch};

/// Dictionary work for one series touched by a batch.
#[derive(Debug, Clone, Copy)]
struct SeriesDelta {
    fingerprint: u64,
    added: u64,
}

/// A batch of points validated and encoded, ready to commit.
#[derive(Debug, Default)]
pub(crate) struct PreparedBatch {
    /// Keyed by dictionary key; the ordered map also gives a stable commit order.
    series: BTreeMap<Vec<u8>, SeriesDelta>,
    points: Vec<(Vec<u8>, Vec<u8>)>,
}

impl PreparedBatch {
    /// Validates and encodes `points`. Nothing touches the store here, so any
    /// error leaves it unchanged.
    pub(crate) fn prepare(points: &[Point]) -> Result<Self> {
        for point in points {
            point.validate()?;
        }

        let mut batch = Self {
            series: BTreeMap::new(),
            points: Vec::with_capacity(points.len()),
        };
        for point in points {
            let labels = CanonicalLabels::new(&point.labels)?;
            let key = codec::point_key(&point.measurement, &point.time, &labels)?;
            let value = codec::encode_fields(&point.fields)?;
            let dictionary_key = codec::dictionary_key(&point.measurement, &labels)?;

            batch
                .series
                .entry(dictionary_key)
                .or_insert(SeriesDelta {
                    fingerprint: labels.fingerprint(),
                    added: 0,
                })
                .added += 1;
            batch.points.push((key, value));
        }
        Ok(batch)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of distinct series the batch touches.
    pub(crate) fn series_count(&self) -> usize {
        self.series.len()
    }
}

/// Commits a prepared batch.
///
/// Locks every touched dictionary key, reads the persisted counters, and writes
/// the updated dictionary entries (no TTL) together with the points (TTL =
/// `retention`) as one atomic batch. The locks are held until the store has
/// committed and are released on every exit path.
pub(crate) fn commit(
    store: &dyn KvStore,
    locks: &KeyLock,
    prepared: PreparedBatch,
    retention: Duration,
    deadline: Instant,
) -> Result<()> {
    if prepared.is_empty() {
        return Ok(());
    }

    let waiting_since = Instant::now();
    let Some(guard) = locks.try_lock_all(prepared.series.keys().map(Vec::as_slice), deadline)
    else {
        let err = Error::LockTimeout {
            waited: waiting_since.elapsed(),
            keys: prepared.series_count(),
        };
        #[cfg(feature = "logging")]
        log::warn!("write aborted: {err}");
        return Err(err);
    };

    let snapshot = store.snapshot()?;
    let mut batch = WriteBatch::with_capacity(prepared.series.len() + prepared.points.len());
    for (key, delta) in prepared.series {
        let meta = series::next_meta(snapshot.as_ref(), &key, delta.fingerprint, delta.added)?;
        batch.put(key, meta.encode().to_vec());
    }
    #[cfg(feature = "logging")]
    let point_count = prepared.points.len();
    for (key, value) in prepared.points {
        batch.put_with_ttl(key, value, retention);
    }

    store.write(batch)?;
    guard.release();

    #[cfg(feature = "logging")]
    log::debug!("committed {point_count} points");

    Ok(())
}

/// Buffered writes committed together.
///
/// Points accumulate in memory until [`commit`](Self::commit), which runs them
/// through the normal write path as a single batch. Dropping the transaction or
/// calling [`rollback`](Self::rollback) discards them.
#[must_use = "buffered points are discarded unless the transaction is committed"]
pub struct WriteTxn<'db> {
    db: &'db crate::Tsdb,
    points: Vec<Point>,
}

impl<'db> WriteTxn<'db> {
    pub(crate) fn new(db: &'db crate::Tsdb) -> Self {
        Self {
            db,
            points: Vec::new(),
        }
    }

    /// Buffers a point after validating it.
    pub fn insert(&mut self, point: Point) -> Result<()> {
        point.validate()?;
        self.points.push(point);
        Ok(())
    }

    /// Buffers several points, validating all of them before buffering any.
    pub fn insert_all(&mut self, points: impl IntoIterator<Item = Point>) -> Result<()> {
        let points: Vec<Point> = points.into_iter().collect();
        for point in &points {
            point.validate()?;
        }
        self.points.extend(points);
        Ok(())
    }

    /// Number of buffered points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Writes every buffered point atomically.
    pub fn commit(self) -> Result<()> {
        self.db.insert(&self.points)
    }

    /// Commits with an explicit lock deadline.
    pub fn commit_with_deadline(self, deadline: Instant) -> Result<()> {
        self.db.insert_with_deadline(&self.points, deadline)
    }

    /// Discards every buffered point.
    pub fn rollback(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn point(host: &str, secs: i64) -> Point {
        Point::new("cpu", Utc.timestamp_opt(secs, 0).unwrap())
            .label("host", host)
            .field("usage", 1.0)
    }

    #[test]
    fn test_prepare_groups_by_series() {
        let points = [point("a", 1), point("b", 2), point("a", 3)];
        let prepared = PreparedBatch::prepare(&points).unwrap();
        assert_eq!(prepared.points.len(), 3);
        assert_eq!(prepared.series_count(), 2);

        let added: Vec<u64> = prepared.series.values().map(|d| d.added).collect();
        assert_eq!(added, vec![2, 1]);
    }

    #[test]
    fn test_prepare_rejects_whole_batch() {
        let points = [point("a", 1), Point::new("cpu", Utc.timestamp_opt(2, 0).unwrap())];
        assert!(matches!(
            PreparedBatch::prepare(&points),
            Err(Error::FieldsRequired)
        ));

        let points = [point("a", 1), point("b,c", 2)];
        assert!(matches!(
            PreparedBatch::prepare(&points),
            Err(Error::Codec(codec_err)) if codec_err.to_string().contains("label value")
        ));
    }
}
