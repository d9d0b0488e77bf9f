//! Binary layouts for point keys, dictionary keys and values.
//!
//! Every key starts with its measurement followed by [`SEP`], then a section tag.
//! Point keys continue with the timestamp in an order-preserving fixed-width form,
//! so a byte-ordered scan over one measurement's point keys walks them in time
//! order, pre-epoch times included:
//!
//! ```text
//! point key:      measurement 00 "points" 00 secs(8) nanos(4) 00 fingerprint(8) 00 k=v,k=v,
//! dictionary key: measurement 00 "labels" 00 k=v,k=v,
//! ```
//!
//! Seconds and nanoseconds are stored big-endian with the sign bit flipped, which
//! makes the byte order of the encoding match the numeric order of the signed
//! value. Label pairs are always written sorted by key.

mod buffer;
mod fields;
mod key;
mod labels;

pub(crate) use self::buffer::ByteBuffer;
pub use self::fields::{Fields, decode_fields, encode_fields};
pub use self::key::{
    PointKey, SeriesMeta, TIME_LEN, decode_dictionary_key, decode_point_key, dictionary_key,
    dictionary_prefix, point_key, points_prefix, time_prefix,
};
pub use self::labels::{CanonicalLabels, Labels, decode_labels, fingerprint};

/// Separator between key sections. Measurements and label text may not contain it.
pub const SEP: u8 = 0x00;

/// Section tag of point keys.
pub const POINTS_TAG: &[u8] = b"points";

/// Section tag of series dictionary keys.
pub const LABELS_TAG: &[u8] = b"labels";
