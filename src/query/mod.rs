//! Range queries over one measurement.
//!
//! A [`Query`] collects the optional parts of a request with chained setters and
//! is turned into a [`ScanPlan`] by [`Query::validate`]. The plan has every
//! required part present, so [`scan`] itself cannot fail validation.

mod matcher;

use std::fmt;
use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

pub use self::matcher::{LabelExpr, matches_all};
use crate::codec::{self, Fields};
use crate::error::{Error, Result};
use crate::point::Point;
use crate::resample::MergePolicy;
use crate::store::{Direction, KeyRange, Snapshot, prefix_successor};

/// Predicate over a point's decoded fields.
pub type FieldFilter = Arc<dyn Fn(&Fields) -> bool + Send + Sync>;

/// Resampling request attached to a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resample {
    /// Window width; zero disables resampling.
    pub window: Duration,
    /// How values inside a window combine.
    pub policy: MergePolicy,
}

/// Query configuration for one measurement.
///
/// ```
/// use chrono::{TimeDelta, Utc};
/// use seriesdb::{LabelExpr, Query};
///
/// let now = Utc::now();
/// let query = Query::new("cpu")
///     .from(now - TimeDelta::hours(1))
///     .label_filter(LabelExpr::equal("host", "a"))
///     .reverse()
///     .limit(10);
/// assert!(query.validate().is_ok());
/// ```
#[derive(Clone)]
pub struct Query {
    measurement: String,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    labels: Vec<LabelExpr>,
    field_filter: Option<FieldFilter>,
    reverse: bool,
    limit: usize,
    resample: Option<Resample>,
}

impl Query {
    /// Starts a query on `measurement` ending now, with no start time yet.
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            start: None,
            end: Some(Utc::now()),
            labels: Vec::new(),
            field_filter: None,
            reverse: false,
            limit: 0,
            resample: None,
        }
    }

    /// Sets the inclusive start time.
    #[must_use]
    pub fn from(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    /// Sets the inclusive end time.
    #[must_use]
    pub fn to(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    /// Sets both ends of the inclusive time range.
    #[must_use]
    pub fn range(self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.from(start).to(end)
    }

    /// Covers the trailing `window` up to now.
    ///
    /// A window reaching past the earliest representable instant starts there.
    #[must_use]
    pub fn last(self, window: Duration) -> Self {
        let now = Utc::now();
        let start = TimeDelta::from_std(window)
            .ok()
            .and_then(|delta| now.checked_sub_signed(delta))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.range(start, now)
    }

    /// Adds a label predicate; all predicates must match.
    #[must_use]
    pub fn label_filter(mut self, expr: LabelExpr) -> Self {
        self.labels.push(expr);
        self
    }

    /// Sets the field predicate, replacing any previous one.
    #[must_use]
    pub fn field_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Fields) -> bool + Send + Sync + 'static,
    {
        self.field_filter = Some(Arc::new(filter));
        self
    }

    /// Returns results newest first.
    #[must_use]
    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Caps the number of results. `0` leaves the query unlimited.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        if limit > 0 {
            self.limit = limit;
        }
        self
    }

    /// Aggregates data-point results into `window`-wide buckets.
    #[must_use]
    pub fn resample(mut self, window: Duration, policy: MergePolicy) -> Self {
        self.resample = Some(Resample { window, policy });
        self
    }

    /// Checks the required parts and produces an executable plan.
    pub fn validate(&self) -> Result<ScanPlan> {
        if self.measurement.is_empty() {
            return Err(Error::MeasurementRequired);
        }
        let Some(start) = self.start else {
            return Err(Error::StartRequired);
        };
        let Some(end) = self.end else {
            return Err(Error::EndRequired);
        };

        Ok(ScanPlan {
            measurement: self.measurement.clone(),
            start,
            end,
            labels: self.labels.clone(),
            field_filter: self.field_filter.clone(),
            direction: if self.reverse {
                Direction::Reverse
            } else {
                Direction::Forward
            },
            limit: self.limit,
            resample: self.resample,
        })
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("measurement", &self.measurement)
            .field("start", &self.start)
            .field("end", &self.end)
            .field("labels", &self.labels)
            .field("field_filter", &self.field_filter.is_some())
            .field("reverse", &self.reverse)
            .field("limit", &self.limit)
            .field("resample", &self.resample)
            .finish()
    }
}

/// A validated query.
#[derive(Clone)]
pub struct ScanPlan {
    /// Measurement to scan.
    pub measurement: String,
    /// Inclusive lower time bound.
    pub start: DateTime<Utc>,
    /// Inclusive upper time bound.
    pub end: DateTime<Utc>,
    /// Label predicates, AND-ed.
    pub labels: Vec<LabelExpr>,
    /// Optional field predicate.
    pub field_filter: Option<FieldFilter>,
    /// Iteration order.
    pub direction: Direction,
    /// Maximum number of results; `0` is unlimited.
    pub limit: usize,
    /// Optional resampling of data-point results.
    pub resample: Option<Resample>,
}

impl ScanPlan {
    /// Key range holding every point of the measurement with
    /// `start <= time <= end`.
    pub fn key_range(&self) -> Result<KeyRange> {
        let lower = codec::time_prefix(&self.measurement, &self.start)?;
        let upper = codec::time_prefix(&self.measurement, &self.end)?;
        let end = match prefix_successor(&upper) {
            Some(succ) => Bound::Excluded(succ),
            None => Bound::Unbounded,
        };
        Ok(KeyRange::new(Bound::Included(lower), end))
    }

    fn past_bound(&self, time: &DateTime<Utc>) -> bool {
        match self.direction {
            Direction::Forward => *time > self.end,
            Direction::Reverse => *time < self.start,
        }
    }
}

impl fmt::Debug for ScanPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanPlan")
            .field("measurement", &self.measurement)
            .field("start", &self.start)
            .field("end", &self.end)
            .field("labels", &self.labels)
            .field("field_filter", &self.field_filter.is_some())
            .field("direction", &self.direction)
            .field("limit", &self.limit)
            .field("resample", &self.resample)
            .finish()
    }
}

/// Runs `plan` against a store snapshot.
///
/// Points come back in key order: ascending time for forward scans, descending
/// for reverse ones. Any key or value that fails to decode aborts the scan.
pub fn scan(snapshot: &dyn Snapshot, plan: &ScanPlan) -> Result<Vec<Point>> {
    let mut points = Vec::new();
    if plan.start > plan.end {
        return Ok(points);
    }

    let range = plan.key_range()?;
    for item in snapshot.scan(range, plan.direction)? {
        let (key, value) = item?;
        let key = codec::decode_point_key(&key)?;
        if key.measurement != plan.measurement || plan.past_bound(&key.time) {
            break;
        }
        if !matches_all(&plan.labels, &key.labels) {
            continue;
        }

        let fields = codec::decode_fields(&value)?;
        if let Some(filter) = &plan.field_filter {
            if !filter(&fields) {
                continue;
            }
        }

        points.push(Point {
            measurement: key.measurement,
            labels: key.labels,
            fields,
            time: key.time,
        });
        if plan.limit > 0 && points.len() >= plan.limit {
            break;
        }
    }

    #[cfg(feature = "logging")]
    log::trace!(
        "scan of {:?} [{}, {}] returned {} points",
        plan.measurement,
        plan.start,
        plan.end,
        points.len()
    );

    Ok(points)
}
