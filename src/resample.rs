//! Downsampling of raw points into fixed-width windows.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::Fields;
use crate::point::DataPoint;

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// How the values of one field inside a window combine into one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// The value of the latest point in the window.
    #[default]
    Last,
    /// The value of the earliest point in the window.
    First,
    /// Sum of the values.
    Sum,
    /// Arithmetic mean of the values.
    Mean,
    /// Smallest value.
    Min,
    /// Largest value.
    Max,
    /// Number of points carrying the field.
    Count,
}

impl MergePolicy {
    /// Reduces an aggregate to the value this policy selects.
    pub fn apply(self, aggregate: &Aggregate) -> f64 {
        match self {
            Self::Last => aggregate.last,
            Self::First => aggregate.first,
            Self::Sum => aggregate.sum,
            Self::Mean => aggregate.mean(),
            Self::Min => aggregate.min,
            Self::Max => aggregate.max,
            #[allow(clippy::cast_precision_loss)]
            Self::Count => aggregate.count as f64,
        }
    }
}

/// Running summary of one field's values inside a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregate {
    /// Minimum value.
    pub min: f64,
    /// Maximum value.
    pub max: f64,
    /// Sum of all values.
    pub sum: f64,
    /// Number of values.
    pub count: u64,
    /// First value seen.
    pub first: f64,
    /// Last value seen.
    pub last: f64,
}

impl Aggregate {
    /// Creates an aggregate from a single value.
    pub fn from_value(value: f64) -> Self {
        Self {
            min: value,
            max: value,
            sum: value,
            count: 1,
            first: value,
            last: value,
        }
    }

    /// Accumulates a value into this aggregate.
    pub fn accumulate(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
        self.count += 1;
        self.last = value;
    }

    /// Arithmetic mean of the accumulated values.
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }
}

/// Aggregates `points` into windows `[start + k*window, start + (k+1)*window)`.
///
/// Points before `start` or after `end` are dropped. Each window that received at
/// least one point yields one [`DataPoint`] stamped with the window start, whose
/// fields merge the window's values per field name under `policy`. Windows come
/// out in ascending order. `First` and `Last` follow the order of `points`, so
/// callers pass them ascending by time.
///
/// A zero `window` returns the input unchanged.
pub fn resample(
    points: &[DataPoint],
    window: Duration,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    policy: MergePolicy,
) -> Vec<DataPoint> {
    if window.is_zero() {
        return points.to_vec();
    }

    // Durations up to ~5e21 years fit; anything wider holds the whole range in window 0.
    let width = i128::try_from(window.as_nanos()).unwrap_or(i128::MAX);
    let origin = to_nanos(&start);

    let mut windows: BTreeMap<i128, BTreeMap<&str, Aggregate>> = BTreeMap::new();
    for point in points {
        if point.time < start || point.time > end {
            continue;
        }
        let index = (to_nanos(&point.time) - origin) / width;
        let fields = windows.entry(index).or_default();
        for (name, &value) in &point.fields {
            fields
                .entry(name.as_str())
                .and_modify(|agg| agg.accumulate(value))
                .or_insert_with(|| Aggregate::from_value(value));
        }
    }

    windows
        .into_iter()
        .filter_map(|(index, fields)| {
            let time = from_nanos(origin + index * width)?;
            let fields: Fields = fields
                .into_iter()
                .map(|(name, agg)| (name.to_string(), policy.apply(&agg)))
                .collect();
            Some(DataPoint { time, fields })
        })
        .collect()
}

fn to_nanos(time: &DateTime<Utc>) -> i128 {
    i128::from(time.timestamp()) * NANOS_PER_SEC + i128::from(time.timestamp_subsec_nanos())
}

fn from_nanos(nanos: i128) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(nanos.div_euclid(NANOS_PER_SEC)).ok()?;
    let subsec = u32::try_from(nanos.rem_euclid(NANOS_PER_SEC)).ok()?;
    DateTime::from_timestamp(secs, subsec)
}
