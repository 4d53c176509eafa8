//! Wire-encoding identifiers
//!
//! Each wire format a decoder can handle is named by a small integer id.
//! Ids are bounded so the decoder lookup tables stay small.

/// Upper bound (inclusive) on acceptable wire-encoding ids
pub const MAX_MESSAGE_ENCODING: u16 = 256;

/// JSON envelope encoding
pub const JSON: u16 = 0;

/// Protobuf envelope encoding
pub const PROTOCOL_BUFFER: u16 = 1;

/// The encodings every relay process knows about before any configuration
/// is loaded. Additional encodings can be registered at startup.
pub fn well_known_encodings() -> impl Iterator<Item = (&'static str, u16)> {
    [("JSON", JSON), ("PROTOCOL_BUFFER", PROTOCOL_BUFFER)].into_iter()
}
