use std::collections::BTreeMap;

use super::buffer::ByteReader;
use super::labels::{check_reserved, utf8};
use crate::error::CodecError;
use crate::pool;

/// A point's numeric fields, kept in name order.
pub type Fields = BTreeMap<String, f64>;

const NAME_END: u8 = b'=';

/// Encodes a point value.
///
/// Layout: a LEB128 field count, then for every field in name order its UTF-8
/// name, `=`, and the 8-byte big-endian IEEE-754 bits of its value. The count
/// delimits the list and the fixed-width value delimits each field, so no byte
/// pattern inside a value can be mistaken for a boundary.
pub fn encode_fields(fields: &Fields) -> Result<Vec<u8>, CodecError> {
    let mut buf = pool::buffer();
    buf.put_varint(fields.len() as u64);
    for (name, value) in fields {
        if name.is_empty() {
            return Err(CodecError::InvalidValue("field name is empty".to_string()));
        }
        check_reserved("field name", name, &[NAME_END])?;
        buf.put_slice(name.as_bytes());
        buf.put_u8(NAME_END);
        buf.put_f64(*value);
    }
    Ok(buf.to_vec())
}

/// Decodes a value written by [`encode_fields`].
///
/// Values round-trip bit for bit, NaN payloads included.
pub fn decode_fields(bytes: &[u8]) -> Result<Fields, CodecError> {
    let mut reader = ByteReader::new(bytes);
    let count = reader.read_varint()?;

    let mut fields = Fields::new();
    for _ in 0..count {
        let Some(name) = reader.read_until(NAME_END) else {
            return Err(CodecError::InvalidValue(
                "field name is not terminated by '='".to_string(),
            ));
        };
        let name = utf8(name, "field name")?;
        let value = reader.read_f64()?;
        fields.insert(name, value);
    }

    if !reader.is_empty() {
        return Err(CodecError::InvalidValue(format!(
            "{} trailing bytes after {count} fields",
            reader.remaining()
        )));
    }
    Ok(fields)
}
