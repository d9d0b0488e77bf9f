use chrono::{DateTime, Utc};

use super::buffer::{ByteBuffer, ByteReader};
use super::labels::{CanonicalLabels, Labels, check_reserved, decode_labels, utf8};
use super::{LABELS_TAG, POINTS_TAG, SEP};
use crate::error::CodecError;
use crate::pool;

/// Width of the encoded timestamp: 8 bytes of seconds plus 4 of nanoseconds.
pub const TIME_LEN: usize = 12;

/// A decoded point key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointKey {
    /// Measurement name.
    pub measurement: String,
    /// Point timestamp.
    pub time: DateTime<Utc>,
    /// Series fingerprint stored in the key.
    pub fingerprint: u64,
    /// The series' label set.
    pub labels: Labels,
}

/// Encodes a point key:
/// `measurement SEP "points" SEP secs nanos SEP fingerprint SEP labels`.
pub fn point_key(
    measurement: &str,
    time: &DateTime<Utc>,
    labels: &CanonicalLabels,
) -> Result<Vec<u8>, CodecError> {
    let mut buf = pool::buffer();
    put_points_prefix(&mut buf, measurement)?;
    put_time(&mut buf, time)?;
    buf.put_u8(SEP);
    buf.put_u64(labels.fingerprint());
    buf.put_u8(SEP);
    buf.put_slice(labels.as_bytes());
    Ok(buf.to_vec())
}

/// Prefix shared by every point key of `measurement`.
pub fn points_prefix(measurement: &str) -> Result<Vec<u8>, CodecError> {
    let mut buf = pool::buffer();
    put_points_prefix(&mut buf, measurement)?;
    Ok(buf.to_vec())
}

/// Prefix shared by every point key of `measurement` stamped exactly `time`.
///
/// Keys sort by this prefix first, so the range
/// `[time_prefix(start), successor(time_prefix(end)))` holds exactly the points
/// with `start <= time <= end`.
pub fn time_prefix(measurement: &str, time: &DateTime<Utc>) -> Result<Vec<u8>, CodecError> {
    let mut buf = pool::buffer();
    put_points_prefix(&mut buf, measurement)?;
    put_time(&mut buf, time)?;
    Ok(buf.to_vec())
}

/// Decodes a key written by [`point_key`].
pub fn decode_point_key(key: &[u8]) -> Result<PointKey, CodecError> {
    let mut reader = ByteReader::new(key);
    let measurement = read_measurement(&mut reader)?;
    expect_tag(&mut reader, POINTS_TAG)?;

    let time = read_time(&mut reader)?;
    reader.expect_u8(SEP, "after timestamp")?;
    let fingerprint = reader.read_u64()?;
    reader.expect_u8(SEP, "after fingerprint")?;
    let labels = decode_labels(reader.rest())?;

    Ok(PointKey {
        measurement,
        time,
        fingerprint,
        labels,
    })
}

/// Encodes a series dictionary key: `measurement SEP "labels" SEP labels`.
pub fn dictionary_key(measurement: &str, labels: &CanonicalLabels) -> Result<Vec<u8>, CodecError> {
    let mut buf = pool::buffer();
    put_dictionary_prefix(&mut buf, measurement)?;
    buf.put_slice(labels.as_bytes());
    Ok(buf.to_vec())
}

/// Prefix shared by every dictionary key of `measurement`.
pub fn dictionary_prefix(measurement: &str) -> Result<Vec<u8>, CodecError> {
    let mut buf = pool::buffer();
    put_dictionary_prefix(&mut buf, measurement)?;
    Ok(buf.to_vec())
}

/// Decodes a key written by [`dictionary_key`] into its measurement and labels.
pub fn decode_dictionary_key(key: &[u8]) -> Result<(String, Labels), CodecError> {
    let mut reader = ByteReader::new(key);
    let measurement = read_measurement(&mut reader)?;
    expect_tag(&mut reader, LABELS_TAG)?;
    let labels = decode_labels(reader.rest())?;
    Ok((measurement, labels))
}

fn put_points_prefix(buf: &mut ByteBuffer, measurement: &str) -> Result<(), CodecError> {
    put_measurement(buf, measurement)?;
    buf.put_slice(POINTS_TAG);
    buf.put_u8(SEP);
    Ok(())
}

fn put_dictionary_prefix(buf: &mut ByteBuffer, measurement: &str) -> Result<(), CodecError> {
    put_measurement(buf, measurement)?;
    buf.put_slice(LABELS_TAG);
    buf.put_u8(SEP);
    Ok(())
}

fn put_measurement(buf: &mut ByteBuffer, measurement: &str) -> Result<(), CodecError> {
    check_reserved("measurement", measurement, &[SEP])?;
    buf.put_slice(measurement.as_bytes());
    buf.put_u8(SEP);
    Ok(())
}

fn put_time(buf: &mut ByteBuffer, time: &DateTime<Utc>) -> Result<(), CodecError> {
    // Sub-second nanos stay below 2e9 even across a leap second.
    let nanos = i32::try_from(time.timestamp_subsec_nanos())
        .map_err(|_| CodecError::InvalidKey(format!("sub-second nanos out of range in {time}")))?;
    buf.put_sortable_i64(time.timestamp());
    buf.put_sortable_i32(nanos);
    Ok(())
}

fn read_measurement(reader: &mut ByteReader<'_>) -> Result<String, CodecError> {
    let Some(measurement) = reader.read_until(SEP) else {
        return Err(CodecError::InvalidKey(
            "missing separator after measurement".to_string(),
        ));
    };
    utf8(measurement, "measurement")
}

fn expect_tag(reader: &mut ByteReader<'_>, tag: &[u8]) -> Result<(), CodecError> {
    match reader.read_until(SEP) {
        Some(found) if found == tag => Ok(()),
        Some(found) => Err(CodecError::InvalidKey(format!(
            "expected {:?} section, found {:?}",
            String::from_utf8_lossy(tag),
            String::from_utf8_lossy(found)
        ))),
        None => Err(CodecError::InvalidKey(format!(
            "missing separator after {:?} section",
            String::from_utf8_lossy(tag)
        ))),
    }
}

fn read_time(reader: &mut ByteReader<'_>) -> Result<DateTime<Utc>, CodecError> {
    let secs = reader.read_sortable_i64()?;
    let nanos = reader.read_sortable_i32()?;
    let nanos = u32::try_from(nanos)
        .map_err(|_| CodecError::InvalidKey(format!("negative nanoseconds {nanos}")))?;
    DateTime::from_timestamp(secs, nanos)
        .ok_or_else(|| CodecError::InvalidKey(format!("timestamp {secs}.{nanos:09} out of range")))
}

/// Persisted metadata for one series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeriesMeta {
    /// Fingerprint of the series' canonical label set.
    pub fingerprint: u64,
    /// Number of points ever written to the series.
    pub counter: u64,
}

impl SeriesMeta {
    /// Encoded width: fingerprint then counter, both big-endian `u64`.
    pub const ENCODED_LEN: usize = 16;

    /// Encodes the metadata value.
    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..8].copy_from_slice(&self.fingerprint.to_be_bytes());
        out[8..].copy_from_slice(&self.counter.to_be_bytes());
        out
    }

    /// Decodes a value written by [`encode`](Self::encode).
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = ByteReader::new(bytes);
        let fingerprint = reader.read_u64()?;
        let counter = reader.read_u64()?;
        if !reader.is_empty() {
            return Err(CodecError::InvalidValue(format!(
                "series metadata is {} bytes, expected {}",
                bytes.len(),
                Self::ENCODED_LEN
            )));
        }
        Ok(Self {
            fingerprint,
            counter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn canonical(pairs: &[(&str, &str)]) -> CanonicalLabels {
        let labels: Labels = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        CanonicalLabels::new(&labels).unwrap()
    }

    #[test]
    fn test_point_key_roundtrip() {
        let labels = canonical(&[("host", "a"), ("dc", "eu")]);
        let time = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();

        let key = point_key("cpu", &time, &labels).unwrap();
        let decoded = decode_point_key(&key).unwrap();

        assert_eq!(decoded.measurement, "cpu");
        assert_eq!(decoded.time, time);
        assert_eq!(decoded.fingerprint, labels.fingerprint());
        assert_eq!(decoded.labels, labels.decode().unwrap());
    }

    #[test]
    fn test_key_layout() {
        let labels = canonical(&[("host", "a")]);
        let time = Utc.timestamp_opt(0, 0).unwrap();
        let key = point_key("m", &time, &labels).unwrap();

        let mut expected = b"m\0points\0".to_vec();
        expected.extend_from_slice(&(1u64 << 63).to_be_bytes());
        expected.extend_from_slice(&(1u32 << 31).to_be_bytes());
        expected.push(0);
        expected.extend_from_slice(&labels.fingerprint().to_be_bytes());
        expected.push(0);
        expected.extend_from_slice(b"host=a,");
        assert_eq!(key, expected);

        assert!(key.starts_with(&time_prefix("m", &time).unwrap()));
        assert!(key.starts_with(&points_prefix("m").unwrap()));
        assert_eq!(
            dictionary_key("m", &labels).unwrap(),
            b"m\0labels\0host=a,".to_vec()
        );
    }

    #[test]
    fn test_dictionary_key_roundtrip() {
        let labels = canonical(&[("host", "a"), ("zone", "x=y")]);
        let key = dictionary_key("disk", &labels).unwrap();
        assert!(key.starts_with(&dictionary_prefix("disk").unwrap()));

        let (measurement, decoded) = decode_dictionary_key(&key).unwrap();
        assert_eq!(measurement, "disk");
        assert_eq!(decoded, labels.decode().unwrap());
    }

    #[test]
    fn test_measurement_with_separator_rejected() {
        let labels = canonical(&[]);
        let err = point_key("c\0pu", &Utc::now(), &labels).unwrap_err();
        assert!(matches!(err, CodecError::ReservedByte { what: "measurement", .. }));
    }

    #[test]
    fn test_malformed_point_keys() {
        assert!(matches!(
            decode_point_key(b"cpu"),
            Err(CodecError::InvalidKey(_))
        ));
        assert!(matches!(
            decode_point_key(b"cpu\0labels\0host=a,"),
            Err(CodecError::InvalidKey(_))
        ));
        assert!(matches!(
            decode_point_key(b"cpu\0points\0\x80\x00"),
            Err(CodecError::UnexpectedEof { needed: 8, remaining: 2 })
        ));

        let labels = canonical(&[("host", "a")]);
        let mut key = point_key("cpu", &Utc::now(), &labels).unwrap();
        let sep_after_time = b"cpu\0points\0".len() + TIME_LEN;
        key[sep_after_time] = b'x';
        assert!(matches!(
            decode_point_key(&key),
            Err(CodecError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_series_meta_codec() {
        let meta = SeriesMeta {
            fingerprint: 0xdead_beef,
            counter: 7,
        };
        assert_eq!(SeriesMeta::decode(&meta.encode()).unwrap(), meta);
        assert!(matches!(
            SeriesMeta::decode(&[0; 10]),
            Err(CodecError::UnexpectedEof { .. })
        ));
        assert!(matches!(
            SeriesMeta::decode(&[0; 17]),
            Err(CodecError::InvalidValue(_))
        ));
    }
}
