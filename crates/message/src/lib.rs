//! Relay - Message
//!
//! The uniform in-memory message record that flows through the pipeline,
//! plus the wire codecs the built-in decoders use to produce it.
//!
//! # Overview
//!
//! Inputs hand raw bytes to a decoder, which fills in a [`Message`]: a
//! timestamped, uuid-stamped record with a small fixed envelope (type,
//! logger, severity, payload, hostname, pid) and an open set of typed
//! dynamic fields. Matchers evaluate predicates against it, outputs render
//! it.
//!
//! # Modules
//!
//! - `message` - the `Message` record and `FieldValue` dynamic fields
//! - `encoding` - wire-encoding ids (`JSON`, `PROTOCOL_BUFFER`, bounds)
//! - `json` - JSON envelope codec
//! - `wire` - protobuf envelope codec

mod encoding;
mod error;
mod json;
mod message;
mod wire;

pub use encoding::{well_known_encodings, JSON, MAX_MESSAGE_ENCODING, PROTOCOL_BUFFER};
pub use error::DecodeError;
pub use message::{FieldValue, Message};
pub use wire::{WireField, WireMessage};

/// Result type for message decoding operations
pub type Result<T> = std::result::Result<T, DecodeError>;
