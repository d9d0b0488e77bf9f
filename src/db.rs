//! The database handle.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::clock::{Clock, SystemClock};
use crate::codec::{self, CanonicalLabels, Labels, SeriesMeta};
use crate::config::{Options, StoreConfig, TsdbBuilder};
use crate::error::{Error, Result};
use crate::lock::KeyLock;
use crate::point::{DataPoint, Point, is_zero_time};
use crate::query::{self, Query};
use crate::resample::resample;
use crate::series::{self, Series};
use crate::store::{Direction, KvStore, MemoryStore, RedbStore};
use crate::write::{self, PreparedBatch, WriteTxn};

/// Stand-in deadline when `now + timeout` does not fit in an [`Instant`].
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A time-series database over an ordered key-value store.
///
/// The handle is `Send + Sync`; share it between threads with an [`Arc`] and call
/// any method concurrently. Writes touching the same series serialize on the
/// series lock table, and reads run against store snapshots without blocking
/// writers.
pub struct Tsdb {
    store: Arc<dyn KvStore>,
    locks: KeyLock,
    options: Options,
}

impl Tsdb {
    /// Returns a builder for configuring and opening a database.
    pub fn builder() -> TsdbBuilder {
        TsdbBuilder::new()
    }

    /// Opens the store described by `options`.
    pub fn open(options: Options) -> Result<Self> {
        Self::open_with_clock(options, None)
    }

    /// Opens an ephemeral in-memory database with default options.
    pub fn in_memory() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), Options::default())
    }

    pub(crate) fn open_with_clock(options: Options, clock: Option<Arc<dyn Clock>>) -> Result<Self> {
        let clock = clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store: Arc<dyn KvStore> = match &options.store {
            StoreConfig::InMemory => Arc::new(MemoryStore::with_clock(clock)),
            StoreConfig::Redb { path } => Arc::new(RedbStore::open_with_clock(path, clock)?),
        };

        #[cfg(feature = "logging")]
        log::info!(
            "opened time-series database (store: {:?}, retention: {:?})",
            options.store,
            options.effective_retention()
        );

        Ok(Self::with_store(store, options))
    }

    /// Wraps an already opened store.
    ///
    /// `options.store` is informational only here.
    pub fn with_store(store: Arc<dyn KvStore>, options: Options) -> Self {
        Self {
            store,
            locks: KeyLock::new(options.lock_stripes),
            options,
        }
    }

    /// The options the database was opened with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Writes `points` atomically, waiting at most the configured lock timeout
    /// for series locks.
    ///
    /// Every point is validated and encoded before anything is written; one bad
    /// point rejects the whole call. Writing a point whose measurement, labels and
    /// time match an existing one overwrites its fields.
    pub fn insert(&self, points: &[Point]) -> Result<()> {
        self.insert_with_deadline(points, deadline_after(self.options.lock_timeout))
    }

    /// Like [`insert`](Self::insert) with an explicit lock deadline.
    pub fn insert_with_deadline(&self, points: &[Point], deadline: Instant) -> Result<()> {
        let prepared = PreparedBatch::prepare(points)?;
        write::commit(
            self.store.as_ref(),
            &self.locks,
            prepared,
            self.options.effective_retention(),
            deadline,
        )
    }

    /// Starts a buffered write transaction.
    pub fn begin(&self) -> WriteTxn<'_> {
        WriteTxn::new(self)
    }

    /// Reads the point of one series at exactly `time`.
    pub fn get(
        &self,
        measurement: &str,
        labels: &Labels,
        time: DateTime<Utc>,
    ) -> Result<Option<DataPoint>> {
        if measurement.is_empty() {
            return Err(Error::MeasurementRequired);
        }
        if is_zero_time(&time) {
            return Err(Error::TimeRequired);
        }

        let canonical = CanonicalLabels::new(labels)?;
        let key = codec::point_key(measurement, &time, &canonical)?;
        match self.store.get(&key)? {
            Some(value) => Ok(Some(DataPoint::new(time, codec::decode_fields(&value)?))),
            None => Ok(None),
        }
    }

    /// Runs `query` and returns full points with their labels.
    ///
    /// Any resampling request on the query is ignored here; see
    /// [`query_data_points`](Self::query_data_points).
    pub fn query_points(&self, query: &Query) -> Result<Vec<Point>> {
        let plan = query.validate()?;
        let snapshot = self.store.snapshot()?;
        query::scan(snapshot.as_ref(), &plan)
    }

    /// Runs `query` and returns time/field pairs, resampled if requested.
    ///
    /// Resampling runs on the limited result set. Reverse queries are resampled
    /// in ascending order and returned newest window first.
    pub fn query_data_points(&self, query: &Query) -> Result<Vec<DataPoint>> {
        let plan = query.validate()?;
        let snapshot = self.store.snapshot()?;
        let mut points: Vec<DataPoint> = query::scan(snapshot.as_ref(), &plan)?
            .into_iter()
            .map(DataPoint::from)
            .collect();

        let Some(resampling) = plan.resample.filter(|r| !r.window.is_zero()) else {
            return Ok(points);
        };

        let reverse = plan.direction == Direction::Reverse;
        if reverse {
            points.reverse();
        }
        let mut windows = resample(&points, resampling.window, plan.start, plan.end, resampling.policy);
        if reverse {
            windows.reverse();
        }
        Ok(windows)
    }

    /// Reads the dictionary entry of one series.
    ///
    /// Holds the series' shared lock while reading, so the result never reflects a
    /// write that is still computing its counter.
    pub fn series(&self, measurement: &str, labels: &Labels) -> Result<Option<SeriesMeta>> {
        if measurement.is_empty() {
            return Err(Error::MeasurementRequired);
        }
        let canonical = CanonicalLabels::new(labels)?;
        let key = codec::dictionary_key(measurement, &canonical)?;

        let waiting_since = Instant::now();
        let Some(guard) = self
            .locks
            .try_lock_shared(&key, deadline_after(self.options.lock_timeout))
        else {
            return Err(Error::LockTimeout {
                waited: waiting_since.elapsed(),
                keys: 1,
            });
        };

        let snapshot = self.store.snapshot()?;
        let meta = series::read_meta(snapshot.as_ref(), &key)?;
        guard.release();
        Ok(meta)
    }

    /// Lists every series of `measurement`.
    pub fn list_series(&self, measurement: &str) -> Result<Vec<Series>> {
        if measurement.is_empty() {
            return Err(Error::MeasurementRequired);
        }
        let snapshot = self.store.snapshot()?;
        series::list(snapshot.as_ref(), measurement)
    }

    /// Asks the store to drop expired entries now, returning how many went.
    pub fn purge_expired(&self) -> Result<usize> {
        Ok(self.store.purge_expired()?)
    }
}

impl fmt::Debug for Tsdb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tsdb")
            .field("options", &self.options)
            .field("lock_stripes", &self.locks.stripe_count())
            .finish_non_exhaustive()
    }
}

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_insert_get_and_series() {
        let db = Tsdb::in_memory();
        let point = Point::new("cpu", at(100)).label("host", "a").field("usage", 0.5);
        db.insert(std::slice::from_ref(&point)).unwrap();

        let got = db.get("cpu", &point.labels, at(100)).unwrap().unwrap();
        assert_eq!(got.fields["usage"], 0.5);
        assert!(db.get("cpu", &point.labels, at(101)).unwrap().is_none());

        let meta = db.series("cpu", &point.labels).unwrap().unwrap();
        assert_eq!(meta.counter, 1);
        assert_eq!(
            meta.fingerprint,
            CanonicalLabels::new(&point.labels).unwrap().fingerprint()
        );
    }

    #[test]
    fn test_empty_insert_is_noop() {
        let db = Tsdb::in_memory();
        db.insert(&[]).unwrap();
        assert!(db.list_series("cpu").unwrap().is_empty());
    }

    #[test]
    fn test_get_validation() {
        let db = Tsdb::in_memory();
        assert!(matches!(
            db.get("", &Labels::new(), at(1)),
            Err(Error::MeasurementRequired)
        ));
        assert!(matches!(
            db.get("cpu", &Labels::new(), crate::point::zero_time()),
            Err(Error::TimeRequired)
        ));
    }

    #[test]
    fn test_epoch_point_roundtrip() {
        let db = Tsdb::in_memory();
        let point = Point::new("cpu", DateTime::UNIX_EPOCH).field("usage", 7.0);
        db.insert(std::slice::from_ref(&point)).unwrap();

        let got = db
            .get("cpu", &Labels::new(), DateTime::UNIX_EPOCH)
            .unwrap()
            .unwrap();
        assert_eq!(got.time, DateTime::UNIX_EPOCH);
        assert_eq!(got.fields["usage"], 7.0);
    }

    #[test]
    fn test_deadline_after_saturates() {
        let before = Instant::now();
        assert!(deadline_after(Duration::MAX) > before);
    }
}
