//! Deferred plugin construction
//!
//! A `PluginWrapper` pairs a factory with the section config it was
//! validated against, so additional instances (decoder pool members,
//! restarted filters) can be minted later with an equivalent config.
//!
//! Plugin factories and `init` are untrusted code as far as the loader is
//! concerned: both run under a panic guard so one misbehaving plugin can
//! never tear down configuration loading.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::PipelineError;
use crate::plugin::{PluginConfig, PluginError, PluginKind};
use crate::registry::PluginFactory;

/// A deferred plugin factory bound to its section config
pub struct PluginWrapper {
    name: String,
    config: PluginConfig,
    factory: PluginFactory,
}

impl PluginWrapper {
    pub(crate) fn new(name: impl Into<String>, config: PluginConfig, factory: PluginFactory) -> Self {
        Self {
            name: name.into(),
            config,
            factory,
        }
    }

    /// The section name this wrapper was built for
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The captured section config each created instance receives
    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    /// Create and initialize a fresh plugin instance, discarding errors
    ///
    /// Used for bulk pool fills where the caller has no error channel;
    /// failures are logged. Use [`PluginWrapper::create_with_error`] when
    /// the error matters.
    pub fn create(&self) -> Option<PluginKind> {
        match self.create_with_error() {
            Ok(plugin) => Some(plugin),
            Err(err) => {
                tracing::error!(plugin = %self.name, error = %err, "plugin creation failed");
                None
            }
        }
    }

    /// Create and initialize a fresh plugin instance
    ///
    /// Both the factory and the plugin's `init` run under a panic guard; a
    /// panic is reported as [`PipelineError::InitPanicked`] with no plugin
    /// leaked.
    pub fn create_with_error(&self) -> Result<PluginKind, PipelineError> {
        let result = catch_unwind(AssertUnwindSafe(|| {
            let mut plugin = (self.factory)();
            plugin.init(&self.config).map(|()| plugin)
        }));

        match result {
            Ok(Ok(plugin)) => Ok(plugin),
            Ok(Err(PluginError::Config(reason))) => Err(PipelineError::ConfigLoad {
                section: self.name.clone(),
                name: self.name.clone(),
                reason,
            }),
            Ok(Err(PluginError::Failed(reason))) => Err(PipelineError::InitFailed {
                name: self.name.clone(),
                reason,
            }),
            Err(panic) => Err(PipelineError::InitPanicked {
                name: self.name.clone(),
                reason: panic_reason(panic),
            }),
        }
    }
}

impl std::fmt::Debug for PluginWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginWrapper")
            .field("name", &self.name)
            .finish()
    }
}

fn panic_reason(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
