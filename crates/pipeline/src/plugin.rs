//! Plugin traits and categories
//!
//! Every plugin implements [`Plugin`] plus exactly one of the four category
//! traits. Factories produce a [`PluginKind`] so the loader can hold any
//! category without downcasting; the category a section *claims* (via its
//! type-name suffix) is checked against the category the factory actually
//! produced.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::decoder::DecoderSet;
use crate::pack::Pack;
use crate::runner::{FilterOutputRunner, InputRunner};

/// Raw section config handed to a plugin's `init`
///
/// Plugins deserialize the keys they care about and ignore the rest
/// (including the pipeline-level keys like `message_matcher`).
pub type PluginConfig = toml::Table;

/// Errors a plugin can report from `init` and its run hooks
#[derive(Debug, Error)]
pub enum PluginError {
    /// The section config did not match the plugin's schema
    #[error("invalid config: {0}")]
    Config(String),

    /// The plugin failed at runtime or during initialization
    #[error("{0}")]
    Failed(String),
}

impl PluginError {
    /// Build a config error
    pub fn config(reason: impl Into<String>) -> Self {
        PluginError::Config(reason.into())
    }

    /// Build a runtime failure
    pub fn failed(reason: impl Into<String>) -> Self {
        PluginError::Failed(reason.into())
    }
}

impl From<toml::de::Error> for PluginError {
    fn from(err: toml::de::Error) -> Self {
        PluginError::Config(err.to_string())
    }
}

/// Base contract every plugin fulfills
pub trait Plugin: Send {
    /// Apply the section config. Called exactly once before the plugin's
    /// runner starts.
    fn init(&mut self, config: &PluginConfig) -> Result<(), PluginError>;

    /// Called by the runner after each failed run, before deciding whether
    /// to restart. The default does nothing.
    fn cleanup(&mut self) {}
}

/// An input produces packs from some external source
#[async_trait]
pub trait Input: Plugin {
    /// Drive the input until it is stopped or fails. Take fresh packs from
    /// `runner.new_pack()`, fill them and `runner.inject()` them.
    async fn run(
        &mut self,
        runner: &InputRunner,
        helper: Arc<dyn PluginHelper>,
    ) -> Result<(), PluginError>;

    /// Signal a long-poll input to wind down. The default does nothing.
    fn stop(&mut self) {}
}

/// A decoder turns a pack's raw bytes into its structured message
pub trait Decoder: Plugin {
    /// Decode `pack.msg_bytes()` into `pack.message_mut()`
    fn decode(&mut self, pack: &mut Pack) -> Result<(), PluginError>;
}

/// A filter consumes matched messages and may inject new ones
#[async_trait]
pub trait Filter: Plugin {
    /// Handle one message accepted by this filter's matcher
    async fn process(
        &mut self,
        pack: Arc<Pack>,
        helper: &dyn PluginHelper,
    ) -> Result<(), PluginError>;

    /// Handle a tick, when `ticker_interval` is configured
    async fn timer_event(&mut self, _helper: &dyn PluginHelper) -> Result<(), PluginError> {
        Ok(())
    }
}

/// An output delivers matched messages somewhere external
#[async_trait]
pub trait Output: Plugin {
    /// Handle one message accepted by this output's matcher
    async fn process(
        &mut self,
        pack: Arc<Pack>,
        helper: &dyn PluginHelper,
    ) -> Result<(), PluginError>;

    /// Handle a tick, when `ticker_interval` is configured
    async fn timer_event(&mut self, _helper: &dyn PluginHelper) -> Result<(), PluginError> {
        Ok(())
    }
}

/// A freshly constructed plugin of any category
pub enum PluginKind {
    Input(Box<dyn Input>),
    Decoder(Box<dyn Decoder>),
    Filter(Box<dyn Filter>),
    Output(Box<dyn Output>),
}

impl PluginKind {
    /// The category this plugin value belongs to
    pub fn category(&self) -> PluginCategory {
        match self {
            PluginKind::Input(_) => PluginCategory::Input,
            PluginKind::Decoder(_) => PluginCategory::Decoder,
            PluginKind::Filter(_) => PluginCategory::Filter,
            PluginKind::Output(_) => PluginCategory::Output,
        }
    }

    pub(crate) fn init(&mut self, config: &PluginConfig) -> Result<(), PluginError> {
        match self {
            PluginKind::Input(p) => p.init(config),
            PluginKind::Decoder(p) => p.init(config),
            PluginKind::Filter(p) => p.init(config),
            PluginKind::Output(p) => p.init(config),
        }
    }
}

impl std::fmt::Debug for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PluginKind::{}", self.category())
    }
}

/// The four plugin categories, derived from the type-name suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginCategory {
    Input,
    Decoder,
    Filter,
    Output,
}

const CATEGORY_SUFFIXES: &[(&str, PluginCategory)] = &[
    ("Decoder", PluginCategory::Decoder),
    ("Filter", PluginCategory::Filter),
    ("Input", PluginCategory::Input),
    ("Output", PluginCategory::Output),
];

impl PluginCategory {
    /// Classify a plugin type name by its suffix
    ///
    /// Returns `None` when the name does not end in one of the four
    /// category suffixes.
    pub fn from_type_name(name: &str) -> Option<PluginCategory> {
        CATEGORY_SUFFIXES
            .iter()
            .find(|(suffix, _)| name.ends_with(suffix))
            .map(|&(_, category)| category)
    }

    /// The category name as it appears in type-name suffixes
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginCategory::Input => "Input",
            PluginCategory::Decoder => "Decoder",
            PluginCategory::Filter => "Filter",
            PluginCategory::Output => "Output",
        }
    }
}

impl std::fmt::Display for PluginCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pipeline services surfaced to running plugins
#[async_trait]
pub trait PluginHelper: Send + Sync {
    /// Look up a running output runner by name
    fn output(&self, name: &str) -> Option<Arc<FilterOutputRunner>>;

    /// Look up a running filter runner by name
    fn filter(&self, name: &str) -> Option<Arc<FilterOutputRunner>>;

    /// Handle over the decoder rendezvous pools
    fn decoder_set(&self) -> DecoderSet;

    /// Obtain a fresh pack from the inject pool, stamped and ready to
    /// populate. `msg_loop_count` is the loop count of the message being
    /// reacted to (zero if none); returns `None` when the incremented count
    /// exceeds the configured maximum.
    async fn pipeline_pack(&self, msg_loop_count: u32) -> Option<Pack>;

    /// Send a populated pack into the router. Returns false when the
    /// router is no longer accepting messages.
    async fn inject(&self, pack: Pack) -> bool;
}
