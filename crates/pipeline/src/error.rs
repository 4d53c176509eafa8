//! Pipeline error types
//!
//! Loader errors keep the exact message shapes operators grep for, so the
//! `Display` strings here are part of the interface.

use relay_matcher::MatchError;
use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors raised while building or mutating the pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A plugin section's config failed to decode
    #[error("Can't load config for {section} '{name}': {reason}")]
    ConfigLoad {
        /// Section name from the config file
        section: String,
        /// Plugin instance name (same as the section name)
        name: String,
        /// Decode failure detail
        reason: String,
    },

    /// A plugin's `init` returned an error
    #[error("Initialization failed for '{name}': {reason}")]
    InitFailed {
        /// Plugin instance name
        name: String,
        /// Error reported by the plugin
        reason: String,
    },

    /// A plugin's factory or `init` panicked
    #[error("'{name}' Init() panicked: {reason}")]
    InitPanicked {
        /// Plugin instance name
        name: String,
        /// Panic payload, if it was a string
        reason: String,
    },

    /// `encoding_name` did not name a known wire encoding
    #[error("No encoding named '{name}'")]
    UnknownEncoding {
        /// The unknown encoding name
        name: String,
    },

    /// The encoding id is beyond the acceptable bound
    #[error("Encoding '{name}' id {id} higher than max {max}")]
    EncodingOutOfRange {
        /// Encoding name
        name: String,
        /// Its registered id
        id: u16,
        /// The inclusive upper bound
        max: u16,
    },

    /// An encoding was bound to a decoder type that is not registered
    #[error("No decoder named '{name}' registered as a plugin")]
    UnknownDecoder {
        /// The missing decoder type name
        name: String,
    },

    /// A `message_matcher` expression failed to compile
    #[error("Can't create message matcher for '{name}': {source}")]
    MatcherCompile {
        /// Plugin instance name
        name: String,
        /// Compilation failure
        #[source]
        source: MatchError,
    },

    /// Summary error when any section failed to load
    #[error("{count} errors loading plugins")]
    LoadErrors {
        /// Number of failed sections
        count: usize,
    },

    /// A dynamically added filter failed to start
    #[error("AddFilterRunner '{name}' failed to start: {reason}")]
    FilterStart {
        /// Filter name
        name: String,
        /// Start failure detail
        reason: String,
    },

    /// A runner was started twice
    #[error("'{name}' is already started")]
    AlreadyStarted {
        /// Runner name
        name: String,
    },

    /// The router was started twice
    #[error("message router already started")]
    RouterStarted,
}
