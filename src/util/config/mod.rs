//! tickflow configuration
//!
//! A single TOML file configures the scheduler, the watchdog and logging.
//! Every section and field is optional.
//!
//! ```toml
//! [scheduler]
//! compact = true
//! thread_name_prefix = "coroutine"
//!
//! [watchdog]
//! enabled = true
//! timeout_ms = 1000
//!
//! [log]
//! level = "info"
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use tickflow::util::config::load_from_env;
//!
//! // $TICKFLOW_CONFIG if set, defaults otherwise
//! let config = load_from_env().unwrap();
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runtime::scheduler::GroupConfig;
use crate::runtime::watchdog::WatchdogConfig;
use crate::util::logger::LogLevel;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "TICKFLOW_CONFIG";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    /// Scheduler settings
    #[serde(default)]
    pub scheduler: GroupConfig,
    /// Watchdog settings
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    /// Logging settings
    #[serde(default)]
    pub log: LogConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// One of trace, debug, info, warn, error
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

impl LogConfig {
    /// The configured level, falling back to INFO if it does not parse.
    pub fn level(&self) -> LogLevel {
        self.level.parse().unwrap_or(LogLevel::Info)
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Parse configuration from TOML text.
pub fn parse_config(content: &str) -> Result<RuntimeConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Load configuration from a file.
pub fn load_config(path: &Path) -> Result<RuntimeConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

/// Load the file named by `$TICKFLOW_CONFIG`, or defaults if it is unset.
pub fn load_from_env() -> Result<RuntimeConfig, ConfigError> {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) => load_config(Path::new(&path)),
        None => Ok(RuntimeConfig::default()),
    }
}

/// Render configuration as TOML.
pub fn to_toml(config: &RuntimeConfig) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(config)?)
}
