//! Built-in plugins
//!
//! The two default decoders every relay process carries, plus a trivial
//! output that renders messages through the process log. Everything else
//! (network inputs, file outputs, sandbox filters) lives in external plugin
//! crates.

use std::sync::Arc;

use async_trait::async_trait;
use relay_message::Message;

use crate::pack::Pack;
use crate::plugin::{Decoder, Output, Plugin, PluginConfig, PluginError, PluginHelper, PluginKind};
use crate::registry::PluginRegistry;

/// Decodes JSON envelope payloads
#[derive(Debug, Default)]
pub struct JsonDecoder;

impl Plugin for JsonDecoder {
    fn init(&mut self, _config: &PluginConfig) -> Result<(), PluginError> {
        Ok(())
    }
}

impl Decoder for JsonDecoder {
    fn decode(&mut self, pack: &mut Pack) -> Result<(), PluginError> {
        let message =
            Message::from_json(pack.msg_bytes()).map_err(|e| PluginError::failed(e.to_string()))?;
        *pack.message_mut() = message;
        Ok(())
    }
}

/// Decodes protobuf envelope payloads
#[derive(Debug, Default)]
pub struct ProtobufDecoder;

impl Plugin for ProtobufDecoder {
    fn init(&mut self, _config: &PluginConfig) -> Result<(), PluginError> {
        Ok(())
    }
}

impl Decoder for ProtobufDecoder {
    fn decode(&mut self, pack: &mut Pack) -> Result<(), PluginError> {
        let message = Message::from_protobuf(pack.msg_bytes())
            .map_err(|e| PluginError::failed(e.to_string()))?;
        *pack.message_mut() = message;
        Ok(())
    }
}

/// Writes each accepted message to the process log
#[derive(Debug, Default)]
pub struct LogOutput {
    payload_only: bool,
}

impl Plugin for LogOutput {
    fn init(&mut self, config: &PluginConfig) -> Result<(), PluginError> {
        if let Some(value) = config.get("payload_only") {
            self.payload_only = value
                .as_bool()
                .ok_or_else(|| PluginError::config("payload_only must be a boolean"))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Output for LogOutput {
    async fn process(
        &mut self,
        pack: Arc<Pack>,
        _helper: &dyn PluginHelper,
    ) -> Result<(), PluginError> {
        let msg = pack.message();
        if self.payload_only {
            tracing::info!(target: "relay::log_output", "{}", msg.payload());
        } else {
            tracing::info!(
                target: "relay::log_output",
                logger = msg.logger().unwrap_or_default(),
                msg_type = msg.msg_type().unwrap_or_default(),
                severity = msg.severity(),
                "{}",
                msg.payload()
            );
        }
        Ok(())
    }
}

/// Register the built-in plugins
pub(crate) fn register_builtins(registry: &mut PluginRegistry) {
    registry.register_plugin("JsonDecoder", || {
        PluginKind::Decoder(Box::<JsonDecoder>::default())
    });
    registry.register_plugin("ProtobufDecoder", || {
        PluginKind::Decoder(Box::<ProtobufDecoder>::default())
    });
    registry.register_plugin("LogOutput", || {
        PluginKind::Output(Box::<LogOutput>::default())
    });
}
