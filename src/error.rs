//! Error types for seriesdb operations.

use std::time::Duration;

use thiserror::Error;

use crate::store::StoreError;

/// Result type alias for seriesdb operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while encoding or decoding keys and values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The key does not have the expected layout.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The buffer ended before a fixed-width component could be read.
    #[error("unexpected end of buffer: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof {
        /// Bytes required by the read.
        needed: usize,
        /// Bytes left in the buffer.
        remaining: usize,
    },

    /// A name or value contains a byte reserved by the key layout.
    #[error("{what} {name:?} contains reserved byte 0x{byte:02x}")]
    ReservedByte {
        /// Which component was rejected (measurement, label key, ...).
        what: &'static str,
        /// The offending text.
        name: String,
        /// The reserved byte found in it.
        byte: u8,
    },

    /// A stored value could not be decoded.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

/// Main error type for seriesdb operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A point or query did not name a measurement.
    #[error("measurement is required")]
    MeasurementRequired,

    /// A point carried no fields.
    #[error("fields are required")]
    FieldsRequired,

    /// A point carried the zero timestamp.
    #[error("time is required")]
    TimeRequired,

    /// A query was executed without a start time.
    #[error("start time is required")]
    StartRequired,

    /// A query was executed without an end time.
    #[error("end time is required")]
    EndRequired,

    /// A key or value failed to encode or decode.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A series lock could not be acquired before the deadline.
    #[error("deadline exceeded after {waited:?} acquiring lock for {keys} series key(s)")]
    LockTimeout {
        /// Time spent waiting before giving up.
        waited: Duration,
        /// Number of distinct dictionary keys the call needed.
        keys: usize,
    },

    /// The underlying key-value store reported a failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl Error {
    /// Returns true for errors raised by input validation, before any I/O.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MeasurementRequired
                | Self::FieldsRequired
                | Self::TimeRequired
                | Self::StartRequired
                | Self::EndRequired
        )
    }
}
