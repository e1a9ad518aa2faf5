use std::{fmt, fs, path::Path, path::PathBuf, result::Result as StdResult, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_LOG_LEVEL: i32 = 4;
pub const DEFAULT_LOG_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    pub store: StoreConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    pub path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: i32,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_log_level() -> i32 {
    DEFAULT_LOG_LEVEL
}

fn default_queue_capacity() -> usize {
    DEFAULT_LOG_QUEUE_CAPACITY
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL,
            queue_capacity: DEFAULT_LOG_QUEUE_CAPACITY,
        }
    }
}

impl BridgeConfig {
    /// Config with default log settings rooted at `path`.
    pub fn with_root<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            store: StoreConfig { path: path.into() },
            log: LogConfig::default(),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        content.parse().map_err(Error::config)
    }
}

impl FromStr for BridgeConfig {
    type Err = toml::de::Error;
    fn from_str(s: &str) -> StdResult<Self, Self::Err> {
        toml::from_str(s)
    }
}

impl fmt::Display for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        toml::to_string_pretty(self)
            .map_err(|_| fmt::Error)
            .and_then(|s| write!(f, "{}", s))
    }
}

/**
 * Lock helpers that recover the guard if a previous holder panicked.
 */
#[macro_export]
macro_rules! mutex_lock {
    ($lock:expr) => {{
        $lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }};
}

#[macro_export]
macro_rules! read_lock {
    ($lock:expr) => {{
        $lock
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }};
}

#[macro_export]
macro_rules! write_lock {
    ($lock:expr) => {{
        $lock
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }};
}
