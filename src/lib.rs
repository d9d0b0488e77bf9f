//! # seriesdb
//!
//! Labeled time-series storage and query engine over an embedded ordered key-value
//! store.
//!
//! Points carry a measurement name, a set of string labels, numeric fields and a
//! timestamp. They are stored under byte keys that sort by measurement and then by
//! time, so a time-range query is a single bounded scan of the store. Every
//! distinct label set of a measurement is a series, tracked in a dictionary with a
//! stable fingerprint and a count of the points ever written to it.
//!
//! ## Features
//!
//! - **Order-preserving keys**: range scans walk points in time order, pre-epoch
//!   timestamps included
//! - **Label and field predicates**: `=`, `!=`, `in`, `not in`, `exists`,
//!   `not exists`, plus arbitrary field filters
//! - **Atomic batch writes**: every point of a call becomes visible at once or
//!   not at all
//! - **Series dictionary**: per-series counters kept exact under concurrent writers
//! - **Retention**: points expire after a configurable duration
//! - **Resampling**: downsample query results into fixed windows with an explicit
//!   merge policy
//! - **Pluggable storage**: in-memory or `redb` on disk, or any [`KvStore`]
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use chrono::{TimeDelta, Utc};
//! use seriesdb::{LabelExpr, MergePolicy, Point, Query, Tsdb};
//!
//! # fn main() -> Result<(), seriesdb::Error> {
//! let db = Tsdb::builder().in_memory().open()?;
//!
//! let now = Utc::now();
//! db.insert(&[
//!     Point::new("cpu", now - TimeDelta::seconds(30))
//!         .label("host", "web-1")
//!         .field("usage", 41.0),
//!     Point::new("cpu", now)
//!         .label("host", "web-1")
//!         .field("usage", 43.0),
//! ])?;
//!
//! let query = Query::new("cpu")
//!     .range(now - TimeDelta::minutes(5), now)
//!     .label_filter(LabelExpr::equal("host", "web-1"));
//! assert_eq!(db.query_points(&query)?.len(), 2);
//!
//! let per_hour = query.resample(Duration::from_secs(3600), MergePolicy::Mean);
//! let windows = db.query_data_points(&per_hour)?;
//! assert!(!windows.is_empty());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! The crate never touches a storage format itself: everything goes through the
//! [`KvStore`] trait, which provides snapshots, directional range scans, atomic
//! batches and per-entry TTL. Expiry is enforced by the store; the engine only
//! stamps a TTL on every point it writes.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]

pub mod clock;
pub mod codec;
mod config;
mod db;
mod error;
pub mod lock;
mod point;
mod pool;
pub mod query;
pub mod resample;
mod series;
pub mod store;
mod write;

pub use clock::{Clock, MockClock, SystemClock};
pub use codec::{CanonicalLabels, Fields, Labels, SeriesMeta};
pub use config::{DEFAULT_LOCK_TIMEOUT, DEFAULT_RETENTION, Options, StoreConfig, TsdbBuilder};
pub use db::Tsdb;
pub use error::{CodecError, Error, Result};
pub use point::{DataPoint, Point, zero_time};
pub use query::{LabelExpr, Query, ScanPlan};
pub use resample::{MergePolicy, resample};
pub use series::Series;
pub use store::{KvStore, MemoryStore, RedbStore, StoreError};
pub use write::WriteTxn;
