//! Plugin registry and wire-encoding tables
//!
//! The registry maps plugin type names to factory functions, and owns the
//! two encoding tables: encoding-name → id (extensible at startup) and
//! encoding-id → decoder type name (bound while decoder sections load).
//!
//! Registration happens before any configuration is read and the registry
//! is read-only afterwards. `register_plugin` silently overwrites an
//! existing name; the last registration wins.

use std::collections::HashMap;
use std::sync::Arc;

use relay_message::{well_known_encodings, MAX_MESSAGE_ENCODING};

use crate::builtin;
use crate::error::PipelineError;
use crate::plugin::PluginKind;

/// Factory producing a fresh, uninitialized plugin value
pub type PluginFactory = Arc<dyn Fn() -> PluginKind + Send + Sync>;

/// Process-wide plugin and encoding tables
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
    encodings: HashMap<String, u16>,
    decoders_by_encoding: HashMap<u16, String>,
    top_encoding: u16,
}

impl PluginRegistry {
    /// Create an empty registry seeded with the well-known encodings
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            encodings: well_known_encodings()
                .map(|(name, id)| (name.to_string(), id))
                .collect(),
            decoders_by_encoding: HashMap::new(),
            top_encoding: 0,
        }
    }

    /// Create a registry with the built-in plugins registered
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_builtins(&mut registry);
        registry
    }

    /// Register a plugin factory under a type name
    ///
    /// An existing registration under the same name is silently replaced.
    pub fn register_plugin(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn() -> PluginKind + Send + Sync + 'static,
    ) {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Register an additional wire-encoding name
    pub fn register_encoding(&mut self, name: impl Into<String>, id: u16) {
        self.encodings.insert(name.into(), id);
    }

    /// Look up a factory by plugin type name
    pub fn factory(&self, name: &str) -> Option<PluginFactory> {
        self.factories.get(name).cloned()
    }

    /// Whether a plugin type name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// All registered plugin type names
    pub fn available_types(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Resolve an encoding name to its id
    pub fn encoding_id(&self, name: &str) -> Option<u16> {
        self.encodings.get(name).copied()
    }

    /// Bind a wire encoding to a decoder type name
    ///
    /// Rejects unknown encoding names, ids above [`MAX_MESSAGE_ENCODING`]
    /// and decoder types that are not registered. On success returns the
    /// encoding id and advances `top_encoding`.
    pub fn bind_decoder(
        &mut self,
        decoder_type: &str,
        encoding_name: &str,
    ) -> Result<u16, PipelineError> {
        let id = self
            .encoding_id(encoding_name)
            .ok_or_else(|| PipelineError::UnknownEncoding {
                name: encoding_name.to_string(),
            })?;
        if id > MAX_MESSAGE_ENCODING {
            return Err(PipelineError::EncodingOutOfRange {
                name: encoding_name.to_string(),
                id,
                max: MAX_MESSAGE_ENCODING,
            });
        }
        if !self.contains(decoder_type) {
            return Err(PipelineError::UnknownDecoder {
                name: decoder_type.to_string(),
            });
        }
        if id > self.top_encoding {
            self.top_encoding = id;
        }
        self.decoders_by_encoding
            .insert(id, decoder_type.to_string());
        Ok(id)
    }

    /// The decoder type bound to an encoding id, if any
    pub fn decoder_for_encoding(&self, id: u16) -> Option<&str> {
        self.decoders_by_encoding.get(&id).map(String::as_str)
    }

    /// Highest encoding id bound so far
    pub fn top_encoding(&self) -> u16 {
        self.top_encoding
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.factories.len())
            .field("encodings", &self.encodings.len())
            .field("top_encoding", &self.top_encoding)
            .finish()
    }
}
