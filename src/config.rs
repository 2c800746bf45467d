//! Run configuration.
//!
//! Sources, highest priority first: command-line flags and their
//! environment variables (see [`crate::cli`]), the TOML config file,
//! built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{StressError, StressResult};

/// Longest value the `Records.Value` column holds.
pub const MAX_VALUE_LENGTH: usize = 128;

/// Connection URL prefix selecting the in-process store.
pub const MEMORY_URL: &str = "memory://";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Database hostname
    pub db_server: String,

    pub port: u16,

    pub database: String,

    pub user: String,

    pub password: String,

    /// Full connection URL; overrides the server/port/credential fields
    pub database_url: Option<String>,

    /// Upper bound on pooled connections
    pub max_connections: u32,

    /// How long to wait for a connection from the pool
    pub connect_timeout_ms: u64,

    /// Watchdog deadline registered for every store operation
    pub command_timeout_ms: u64,

    /// Retries of a transient SQL failure before it is reported
    pub max_retries: u32,

    /// Cap on the backoff between two retries
    pub max_retry_delay_ms: u64,

    /// Number of concurrent polling workers
    pub pollers: usize,

    /// Records requested per list call
    pub page_size: usize,

    /// Size of the seeded dataset (ids `0..record_count`)
    pub record_count: u32,

    /// Length of each generated value
    pub value_length: usize,

    pub scheduling_interval_ms: u64,

    pub timer_queue_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_server: "localhost".to_string(),
            port: 3306,
            database: "mysqltest".to_string(),
            user: "root".to_string(),
            password: "pass".to_string(),
            database_url: None,
            max_connections: 100,
            connect_timeout_ms: 60_000,
            command_timeout_ms: 30_000,
            max_retries: 3,
            max_retry_delay_ms: 5000,
            pollers: 250,
            page_size: 1000,
            record_count: 1000,
            value_length: MAX_VALUE_LENGTH,
            scheduling_interval_ms: 2000,
            timer_queue_interval_ms: 1000,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> StressResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> StressResult<Self> {
        toml::from_str(text).map_err(|e| StressError::Config(e.to_string()))
    }

    /// Load from `path` if given, else from the default location if a file
    /// exists there, else fall back to defaults.
    pub fn load(path: Option<&Path>) -> StressResult<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path),
                None => Ok(Self::default()),
            },
        }
    }

    /// The URL handed to the storage backend.
    pub fn connection_url(&self) -> String {
        if let Some(ref url) = self.database_url {
            return url.clone();
        }
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.user, self.password, self.db_server, self.port, self.database
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub fn scheduling_interval(&self) -> Duration {
        Duration::from_millis(self.scheduling_interval_ms)
    }

    pub fn timer_queue_interval(&self) -> Duration {
        Duration::from_millis(self.timer_queue_interval_ms)
    }

    /// Reject settings that would make a run meaningless.
    pub fn validate(&self) -> StressResult<()> {
        let zero = [
            ("pollers", self.pollers == 0),
            ("page_size", self.page_size == 0),
            ("max_connections", self.max_connections == 0),
            ("command_timeout_ms", self.command_timeout_ms == 0),
            ("scheduling_interval_ms", self.scheduling_interval_ms == 0),
            ("timer_queue_interval_ms", self.timer_queue_interval_ms == 0),
        ];
        if let Some((field, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
            return Err(StressError::Config(format!("{} must be greater than zero", field)));
        }
        if self.value_length > MAX_VALUE_LENGTH {
            return Err(StressError::Config(format!(
                "value_length {} exceeds column width {}",
                self.value_length, MAX_VALUE_LENGTH
            )));
        }
        Ok(())
    }
}

/// `<config dir>/dbstress/config.toml`
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("dbstress").join("config.toml"))
}
