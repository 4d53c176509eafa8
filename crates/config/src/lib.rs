//! Relay Configuration
//!
//! TOML-based configuration loading with sensible defaults.
//!
//! The top-level `[global]` and `[log]` tables belong to the daemon; every
//! other top-level table is a plugin section handed to the pipeline loader.
//!
//! # Parsing
//!
//! Use the `FromStr` trait to parse configuration:
//!
//! ```
//! use relay_config::Config;
//! use std::str::FromStr;
//!
//! let config = Config::from_str(
//!     "[TcpInput]\naddress = \"127.0.0.1:5565\"",
//! )
//! .unwrap();
//! assert!(config.plugins.contains_key("TcpInput"));
//! ```
//!
//! # Example Config
//!
//! ```toml
//! [global]
//! pool_size = 100
//!
//! [log]
//! level = "info"
//!
//! [TcpInput]
//! address = "127.0.0.1:5565"
//!
//! [CounterFilter]
//! message_matcher = "Type == 'counter'"
//! ticker_interval = 5
//! ```

mod error;
mod global;
mod logging;
mod plugin;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

pub use error::{ConfigError, Result};
pub use global::GlobalConfig;
pub use logging::LogConfig;
pub use plugin::{PluginGlobals, RetryOptions};

/// Top-level table names reserved for the daemon itself
const RESERVED_SECTIONS: &[&str] = &["global", "log"];

/// Main configuration structure
///
/// Plugin sections keep their raw TOML tables; the pipeline loader decodes
/// them section by section so one bad section cannot poison the rest.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Global settings (pool sizes, loop bounds, channel sizes)
    pub global: GlobalConfig,

    /// Logging configuration
    pub log: LogConfig,

    /// Plugin sections by name, in deterministic order
    pub plugins: BTreeMap<String, toml::Table>,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or contains invalid TOML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&contents)
    }

    fn parse(s: &str) -> Result<Self> {
        let document: toml::Table = toml::from_str(s)?;

        let mut config = Config::default();
        for (name, value) in document {
            if name == "global" {
                config.global = value.try_into()?;
            } else if name == "log" {
                config.log = value.try_into()?;
            } else {
                match value {
                    toml::Value::Table(table) => {
                        config.plugins.insert(name, table);
                    }
                    _ => return Err(ConfigError::NotATable { section: name }),
                }
            }
        }
        Ok(config)
    }

    /// Whether a top-level table name is reserved for the daemon
    pub fn is_reserved_section(name: &str) -> bool {
        RESERVED_SECTIONS.contains(&name)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
