//! Per-section plugin settings
//!
//! Every plugin section starts with the same handful of keys the pipeline
//! itself consumes - `type`, `ticker_interval`, `message_matcher` and so on.
//! The loader peels these off before the remainder of the section reaches
//! the plugin's own `init`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Restart policy for a plugin whose runner exits unexpectedly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    /// Upper bound on the delay between restart attempts
    /// Default: 30s
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Initial delay between restart attempts, doubled each retry
    /// Default: 250ms
    #[serde(with = "humantime_serde")]
    pub delay: Duration,

    /// Number of restart attempts before giving up; -1 retries forever
    /// Default: -1
    pub max_retries: i32,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_delay: Duration::from_secs(30),
            delay: Duration::from_millis(250),
            max_retries: -1,
        }
    }
}

/// The section keys consumed by the pipeline before plugin config decoding
///
/// Unknown keys in a section are left for the plugin itself, so this struct
/// deserializes from any section table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginGlobals {
    /// Plugin type name used for factory lookup; defaults to the section name
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_override: Option<String>,

    /// Seconds between timer events; 0 disables ticking
    pub ticker_interval: u64,

    /// Wire-encoding name this decoder handles (decoders only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding_name: Option<String>,

    /// Matcher predicate source (filters and outputs only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_matcher: Option<String>,

    /// Required signer name (filters and outputs only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_signer: Option<String>,

    /// Decoder pool size; 0 falls back to the global default (decoders only)
    pub pool_size: usize,

    /// Restart policy
    pub retries: RetryOptions,
}

impl Default for PluginGlobals {
    fn default() -> Self {
        Self {
            type_override: None,
            ticker_interval: 0,
            encoding_name: None,
            message_matcher: None,
            message_signer: None,
            pool_size: 0,
            retries: RetryOptions::default(),
        }
    }
}

impl PluginGlobals {
    /// Decode the pipeline-level keys out of a raw section table
    pub fn from_table(table: &toml::Table) -> Result<Self, toml::de::Error> {
        toml::Value::Table(table.clone()).try_into()
    }

    /// Render back into a section table, e.g. for config round-trips
    pub fn to_table(&self) -> Result<toml::Table, toml::ser::Error> {
        match toml::Value::try_from(self)? {
            toml::Value::Table(table) => Ok(table),
            // A struct always serializes to a table
            _ => Ok(toml::Table::new()),
        }
    }

    /// Effective tick interval, if ticking is enabled
    pub fn ticker(&self) -> Option<Duration> {
        if self.ticker_interval == 0 {
            None
        } else {
            Some(Duration::from_secs(self.ticker_interval))
        }
    }
}
