//! Database Options
//!
//! [`Options`] describes how [`Db::open`](crate::Db::open) reaches the
//! underlying SQLite database: where it lives, how long to wait on a locked
//! file, and whether to run the background expiry sweeper.
//!
//! ```
//! use tablekv::config::Options;
//! use tablekv::storage::ExpiryConfig;
//! use std::time::Duration;
//!
//! let opts = Options::file("data.db")
//!     .busy_timeout(Duration::from_secs(2))
//!     .expiry(ExpiryConfig::default().interval(Duration::from_secs(30)));
//! assert!(opts.path.is_some());
//! ```

use crate::storage::ExpiryConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Default time SQLite waits on a locked database file.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time a transaction waits for the single pooled connection.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Options for opening a database.
#[derive(Debug, Clone)]
pub struct Options {
    /// Database file, or `None` for a private in-memory database.
    pub path: Option<PathBuf>,

    /// How long SQLite retries when the file is locked by another process.
    pub busy_timeout: Duration,

    /// How long a transaction waits to acquire the connection.
    pub acquire_timeout: Duration,

    /// Background sweeper settings; `None` disables active expiration.
    pub expiry: Option<ExpiryConfig>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            expiry: Some(ExpiryConfig::default()),
        }
    }
}

impl Options {
    /// Options for an in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Options for a database stored in `path` (created if missing).
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn expiry(mut self, config: ExpiryConfig) -> Self {
        self.expiry = Some(config);
        self
    }

    /// Disables the background sweeper. Expired keys are still hidden from
    /// reads and purged when their name is written again.
    pub fn without_expiry(mut self) -> Self {
        self.expiry = None;
        self
    }
}
