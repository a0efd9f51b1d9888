//! Configuration types for seedbank components.
//!
//! Defaults are hardcoded and can be overridden from the environment:
//! - `IMPORT_BUFFER_SIZE` - records per batch before a forced flush
//! - `IMPORT_MAX_WAIT_MS` - longest a buffered record waits before a flush
//! - `DB_MAX_CONNECTIONS` - database pool size

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

pub const DEFAULT_BUFFER_SIZE: usize = 100;
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_millis(500);

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { max_connections: 5 }
    }
}

impl DbConfig {
    /// Reads `DB_MAX_CONNECTIONS`, falling back to the default when unset.
    pub fn from_env() -> Result<Self, AppError> {
        let mut config = Self::default();
        if let Some(max) = read_env::<u32>("DB_MAX_CONNECTIONS")? {
            config.max_connections = max.max(1);
        }
        Ok(config)
    }
}

/// Import session configuration.
///
/// A session flushes its buffer as soon as it holds `buffer_size` records,
/// and otherwise no later than `max_wait` after the previous flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportConfig {
    /// Number of buffered records that triggers an immediate flush.
    pub buffer_size: usize,
    /// Upper bound on the time between two flushes.
    pub max_wait: Duration,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

impl ImportConfig {
    /// Reads `IMPORT_BUFFER_SIZE` and `IMPORT_MAX_WAIT_MS` over the defaults.
    pub fn from_env() -> Result<Self, AppError> {
        let mut config = Self::default();
        if let Some(size) = read_env::<usize>("IMPORT_BUFFER_SIZE")? {
            config = config.with_buffer_size(size);
        }
        if let Some(ms) = read_env::<u64>("IMPORT_MAX_WAIT_MS")? {
            config = config.with_max_wait(Duration::from_millis(ms));
        }
        Ok(config)
    }

    /// Sets the flush threshold. A size of zero is raised to one.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Sets the maximum wait between flushes. Zero is raised to one millisecond.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait.max(Duration::from_millis(1));
        self
    }
}

fn read_env<T: FromStr>(key: &str) -> Result<Option<T>, AppError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AppError::ConfigError(format!("{} has invalid value '{}'", key, raw))),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(AppError::ConfigError(format!(
            "{} is not valid unicode",
            key
        ))),
    }
}
