//! Message decoding error types

use thiserror::Error;

/// Errors produced while decoding raw bytes into a [`crate::Message`]
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload is not valid protobuf
    #[error("invalid protobuf payload: {0}")]
    Protobuf(#[from] prost::DecodeError),

    /// Payload is not valid JSON
    #[error("invalid json payload: {0}")]
    Json(#[from] serde_json::Error),

    /// A uuid field must be exactly 16 bytes
    #[error("uuid must be 16 bytes, got {0}")]
    UuidLength(usize),

    /// A dynamic field carried a value type the message model cannot hold
    #[error("unsupported value for field '{0}'")]
    UnsupportedField(String),
}
