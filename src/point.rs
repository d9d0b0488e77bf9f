//! Points and their query-side projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::{Fields, Labels};
use crate::error::{Error, Result};

/// A labeled, timestamped set of numeric fields belonging to one measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Measurement name, the top-level key prefix.
    pub measurement: String,
    /// Series labels.
    #[serde(default)]
    pub labels: Labels,
    /// Numeric fields; at least one is required.
    pub fields: Fields,
    /// Timestamp; [`zero_time`] counts as unset.
    pub time: DateTime<Utc>,
}

impl Point {
    /// Creates a point with no labels or fields.
    pub fn new(measurement: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.into(),
            labels: Labels::new(),
            fields: Fields::new(),
            time,
        }
    }

    /// Adds or replaces a label.
    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Adds or replaces a field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: f64) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Replaces the whole label set.
    #[must_use]
    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    /// Replaces the whole field set.
    #[must_use]
    pub fn with_fields(mut self, fields: Fields) -> Self {
        self.fields = fields;
        self
    }

    /// Checks that the point names a measurement, carries at least one field and
    /// has a timestamp.
    pub fn validate(&self) -> Result<()> {
        if self.measurement.is_empty() {
            return Err(Error::MeasurementRequired);
        }
        if self.fields.is_empty() {
            return Err(Error::FieldsRequired);
        }
        if is_zero_time(&self.time) {
            return Err(Error::TimeRequired);
        }
        Ok(())
    }
}

/// Time and fields of a point whose series was already selected by a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Timestamp, or the window start for resampled output.
    pub time: DateTime<Utc>,
    /// Field values.
    pub fields: Fields,
}

impl DataPoint {
    /// Creates a data point.
    pub fn new(time: DateTime<Utc>, fields: Fields) -> Self {
        Self { time, fields }
    }
}

impl From<Point> for DataPoint {
    fn from(point: Point) -> Self {
        Self {
            time: point.time,
            fields: point.fields,
        }
    }
}

/// Seconds from the Unix epoch to `0001-01-01T00:00:00Z`, the zero instant that
/// marks a timestamp as unset.
const ZERO_TIME_SECS: i64 = -62_135_596_800;

/// The zero timestamp, `0001-01-01T00:00:00Z`, used to mean "not set".
///
/// The Unix epoch is an ordinary, valid timestamp.
#[must_use]
pub fn zero_time() -> DateTime<Utc> {
    DateTime::from_timestamp(ZERO_TIME_SECS, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub(crate) fn is_zero_time(time: &DateTime<Utc>) -> bool {
    time.timestamp() == ZERO_TIME_SECS && time.timestamp_subsec_nanos() == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_validate() {
        let ok = Point::new("cpu", at(10)).label("host", "a").field("usage", 1.0);
        assert!(ok.validate().is_ok());

        let no_measurement = Point::new("", at(10)).field("usage", 1.0);
        assert!(matches!(no_measurement.validate(), Err(Error::MeasurementRequired)));

        let no_fields = Point::new("cpu", at(10)).label("host", "a");
        assert!(matches!(no_fields.validate(), Err(Error::FieldsRequired)));

        let no_time = Point::new("cpu", zero_time()).field("usage", 1.0);
        assert!(matches!(no_time.validate(), Err(Error::TimeRequired)));

        let epoch = Point::new("cpu", DateTime::UNIX_EPOCH).field("usage", 1.0);
        assert!(epoch.validate().is_ok());

        let pre_epoch = Point::new("cpu", at(-3600)).field("usage", 1.0);
        assert!(pre_epoch.validate().is_ok());
    }

    #[test]
    fn test_zero_time_is_year_one() {
        let zero = zero_time();
        assert_eq!(zero.to_rfc3339(), "0001-01-01T00:00:00+00:00");
        assert!(is_zero_time(&zero));
        assert!(!is_zero_time(&DateTime::UNIX_EPOCH));
        assert!(!is_zero_time(&(zero + chrono::TimeDelta::nanoseconds(1))));
    }

    #[test]
    fn test_builder_replaces_duplicates() {
        let point = Point::new("cpu", at(1))
            .label("host", "a")
            .label("host", "b")
            .field("usage", 1.0)
            .field("usage", 2.0);
        assert_eq!(point.labels.len(), 1);
        assert_eq!(point.labels["host"], "b");
        assert_eq!(point.fields["usage"], 2.0);

        let data = DataPoint::from(point.clone());
        assert_eq!(data.time, point.time);
        assert_eq!(data.fields, point.fields);
    }
}
