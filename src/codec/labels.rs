use std::collections::BTreeMap;
use std::hash::Hasher;

use super::SEP;
use crate::error::CodecError;
use crate::pool;

/// A point's label set. The ordered map keeps pairs sorted by key, which is
/// the canonical order.
pub type Labels = BTreeMap<String, String>;

const PAIR_SEP: u8 = b'=';
const PAIR_END: u8 = b',';

/// The canonical byte encoding of a label set together with its fingerprint.
///
/// Pairs are written in key order as `k=v,`. Two label sets with the same pairs
/// produce byte-identical encodings and therefore the same fingerprint,
/// however the maps were built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalLabels {
    bytes: Vec<u8>,
    fingerprint: u64,
}

impl CanonicalLabels {
    /// Canonicalizes `labels`, rejecting keys or values that contain bytes
    /// reserved by the encoding.
    pub fn new(labels: &Labels) -> Result<Self, CodecError> {
        let mut buf = pool::buffer();
        for (key, value) in labels {
            check_reserved("label key", key, &[PAIR_SEP, PAIR_END, SEP])?;
            check_reserved("label value", value, &[PAIR_END, SEP])?;
            buf.put_slice(key.as_bytes());
            buf.put_u8(PAIR_SEP);
            buf.put_slice(value.as_bytes());
            buf.put_u8(PAIR_END);
        }
        let bytes = buf.to_vec();
        let fingerprint = fingerprint(&bytes);
        Ok(Self { bytes, fingerprint })
    }

    /// The canonical `k=v,` bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// XxHash64 (seed 0) of [`as_bytes`](Self::as_bytes).
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Decodes the pairs back into a label map.
    pub fn decode(&self) -> Result<Labels, CodecError> {
        decode_labels(&self.bytes)
    }
}

/// Hashes canonical label bytes into a series fingerprint.
pub fn fingerprint(canonical: &[u8]) -> u64 {
    let mut hasher = pool::hasher();
    hasher.write(canonical);
    hasher.finish()
}

/// Parses canonical `k=v,` bytes.
///
/// Keys never contain `=`, so each pair splits at its first `=`; values may
/// contain further `=` bytes.
pub fn decode_labels(bytes: &[u8]) -> Result<Labels, CodecError> {
    let mut labels = Labels::new();
    if bytes.is_empty() {
        return Ok(labels);
    }

    let Some(body) = bytes.strip_suffix(&[PAIR_END]) else {
        return Err(CodecError::InvalidKey(
            "label set is not terminated by ','".to_string(),
        ));
    };

    for pair in body.split(|&b| b == PAIR_END) {
        let Some(idx) = pair.iter().position(|&b| b == PAIR_SEP) else {
            return Err(CodecError::InvalidKey(format!(
                "label pair {:?} has no '='",
                String::from_utf8_lossy(pair)
            )));
        };
        let key = utf8(&pair[..idx], "label key")?;
        let value = utf8(&pair[idx + 1..], "label value")?;
        if labels.insert(key, value).is_some() {
            return Err(CodecError::InvalidKey("duplicate label key".to_string()));
        }
    }

    Ok(labels)
}

pub(crate) fn check_reserved(
    what: &'static str,
    text: &str,
    reserved: &[u8],
) -> Result<(), CodecError> {
    match text.bytes().find(|b| reserved.contains(b)) {
        Some(byte) => Err(CodecError::ReservedByte {
            what,
            name: text.to_string(),
            byte,
        }),
        None => Ok(()),
    }
}

pub(crate) fn utf8(bytes: &[u8], what: &str) -> Result<String, CodecError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| CodecError::InvalidKey(format!("{what} is not valid UTF-8")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_canonical_bytes_sorted() {
        let canonical = CanonicalLabels::new(&labels(&[("zone", "eu"), ("host", "a")])).unwrap();
        assert_eq!(canonical.as_bytes(), b"host=a,zone=eu,");
        assert_eq!(canonical.decode().unwrap(), labels(&[("host", "a"), ("zone", "eu")]));
    }

    #[test]
    fn test_empty_labels() {
        let canonical = CanonicalLabels::new(&Labels::new()).unwrap();
        assert!(canonical.as_bytes().is_empty());
        assert!(canonical.decode().unwrap().is_empty());
    }

    #[test]
    fn test_values_may_contain_equals() {
        let set = labels(&[("query", "a=b"), ("empty", "")]);
        let canonical = CanonicalLabels::new(&set).unwrap();
        assert_eq!(canonical.decode().unwrap(), set);
    }

    #[test]
    fn test_reserved_bytes_rejected() {
        let err = CanonicalLabels::new(&labels(&[("a=b", "x")])).unwrap_err();
        assert!(matches!(err, CodecError::ReservedByte { byte: b'=', .. }));

        let err = CanonicalLabels::new(&labels(&[("host", "a,b")])).unwrap_err();
        assert!(matches!(err, CodecError::ReservedByte { byte: b',', .. }));

        let err = CanonicalLabels::new(&labels(&[("host", "a\0")])).unwrap_err();
        assert!(matches!(err, CodecError::ReservedByte { byte: 0, .. }));
    }

    #[test]
    fn test_malformed_label_bytes() {
        assert!(decode_labels(b"host=a").is_err());
        assert!(decode_labels(b"host,").is_err());
        assert!(decode_labels(b"a=1,a=2,").is_err());
    }
}
