//! Database configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::db::Tsdb;
use crate::error::Result;
use crate::lock::DEFAULT_STRIPES;

/// Default retention: seven days.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default time a write waits for series locks.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Which key-value store backs the database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StoreConfig {
    /// Ephemeral in-process store; contents vanish when the database is dropped.
    ///
    /// Every write copies the full key set, so ingest cost grows with the
    /// stored size and a point-at-a-time fill is quadratic. Prefer large
    /// batches here, and [`StoreConfig::Redb`] for big or long-lived data.
    #[default]
    InMemory,
    /// Persistent `redb` file.
    Redb {
        /// Path of the database file, created if missing.
        path: PathBuf,
    },
}

/// Options for opening a [`Tsdb`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use seriesdb::{Options, StoreConfig};
///
/// let options = Options {
///     retention: Duration::from_secs(24 * 60 * 60),
///     ..Options::default()
/// };
/// assert_eq!(options.store, StoreConfig::InMemory);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// How long points live before the store may expire them.
    ///
    /// Zero selects [`DEFAULT_RETENTION`].
    pub retention: Duration,

    /// How long a write waits for its series locks before failing.
    pub lock_timeout: Duration,

    /// Number of stripes in the series lock table.
    pub lock_stripes: usize,

    /// Store backend.
    pub store: StoreConfig,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_stripes: DEFAULT_STRIPES,
            store: StoreConfig::default(),
        }
    }
}

impl Options {
    /// Retention actually applied to points.
    pub fn effective_retention(&self) -> Duration {
        if self.retention.is_zero() {
            DEFAULT_RETENTION
        } else {
            self.retention
        }
    }
}

/// Builder for configuring and opening a [`Tsdb`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use seriesdb::Tsdb;
///
/// let db = Tsdb::builder()
///     .retention(Duration::from_secs(3600))
///     .lock_timeout(Duration::from_millis(500))
///     .in_memory()
///     .open()?;
/// # Ok::<(), seriesdb::Error>(())
/// ```
pub struct TsdbBuilder {
    options: Options,
    clock: Option<Arc<dyn Clock>>,
}

impl TsdbBuilder {
    /// Creates a builder with default options.
    pub fn new() -> Self {
        Self {
            options: Options::default(),
            clock: None,
        }
    }

    /// Starts from existing options.
    pub fn from_options(options: Options) -> Self {
        Self {
            options,
            clock: None,
        }
    }

    /// Sets the point retention. Zero selects the default.
    #[must_use]
    pub fn retention(mut self, retention: Duration) -> Self {
        self.options.retention = retention;
        self
    }

    /// Sets how long a write waits for series locks.
    #[must_use]
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.options.lock_timeout = timeout;
        self
    }

    /// Sets the number of lock stripes.
    #[must_use]
    pub fn lock_stripes(mut self, stripes: usize) -> Self {
        self.options.lock_stripes = stripes;
        self
    }

    /// Uses an ephemeral in-memory store.
    #[must_use]
    pub fn in_memory(mut self) -> Self {
        self.options.store = StoreConfig::InMemory;
        self
    }

    /// Uses a `redb` file at `path`.
    #[must_use]
    pub fn redb(mut self, path: impl AsRef<Path>) -> Self {
        self.options.store = StoreConfig::Redb {
            path: path.as_ref().to_path_buf(),
        };
        self
    }

    /// Uses `clock` to stamp and evaluate entry expiry.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// The options collected so far.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Opens the configured store and returns the database.
    pub fn open(self) -> Result<Tsdb> {
        Tsdb::open_with_clock(self.options, self.clock)
    }
}

impl Default for TsdbBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_retention_means_default() {
        let options = Options {
            retention: Duration::ZERO,
            ..Options::default()
        };
        assert_eq!(options.effective_retention(), DEFAULT_RETENTION);

        let options = TsdbBuilder::new()
            .retention(Duration::from_secs(60))
            .options()
            .clone();
        assert_eq!(options.effective_retention(), Duration::from_secs(60));
    }

    #[test]
    fn test_builder_store_selection() {
        let builder = TsdbBuilder::new().redb("/tmp/metrics.redb").lock_stripes(8);
        assert_eq!(
            builder.options().store,
            StoreConfig::Redb {
                path: PathBuf::from("/tmp/metrics.redb")
            }
        );
        assert_eq!(builder.options().lock_stripes, 8);
        assert_eq!(builder.in_memory().options().store, StoreConfig::InMemory);
    }
}
