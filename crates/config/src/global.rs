//! Global configuration settings
//!
//! Process-wide knobs read once at startup. All fields have defaults - a
//! minimal config only specifies what it wants to change.

use serde::Deserialize;

/// Global configuration that applies to the whole pipeline
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Number of message packs preallocated per recycle pool
    /// Default: 100
    pub pool_size: usize,

    /// Default decoder pool size when a decoder section does not set its own
    /// Default: 4
    pub decoder_pool_size: usize,

    /// Maximum number of times a logical message may re-enter the pipeline
    /// via filter injection
    /// Default: 4
    pub max_msg_loops: u32,

    /// Inbound channel capacity for each plugin runner
    /// Default: 50
    pub plugin_chan_size: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            pool_size: 100,
            decoder_pool_size: 4,
            max_msg_loops: 4,
            plugin_chan_size: 50,
        }
    }
}
