//! Protobuf envelope codec
//!
//! The on-the-wire protobuf shape of a message. Field tags are part of the
//! wire contract and must not be reordered.

use prost::Message as _;
use uuid::Uuid;

use crate::error::DecodeError;
use crate::message::{FieldValue, Message};

/// One dynamic field on the wire
///
/// Exactly one of the `value_*` members is expected to be set; when several
/// are present the first in tag order wins.
#[derive(Clone, PartialEq, prost::Message)]
pub struct WireField {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, optional, tag = "2")]
    pub value_string: Option<String>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub value_bytes: Option<Vec<u8>>,
    #[prost(int64, optional, tag = "4")]
    pub value_int: Option<i64>,
    #[prost(double, optional, tag = "5")]
    pub value_double: Option<f64>,
    #[prost(bool, optional, tag = "6")]
    pub value_bool: Option<bool>,
}

/// The protobuf message envelope
#[derive(Clone, PartialEq, prost::Message)]
pub struct WireMessage {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub uuid: Option<Vec<u8>>,
    #[prost(int64, optional, tag = "2")]
    pub timestamp: Option<i64>,
    #[prost(string, optional, tag = "3")]
    pub msg_type: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub logger: Option<String>,
    #[prost(int32, optional, tag = "5")]
    pub severity: Option<i32>,
    #[prost(string, optional, tag = "6")]
    pub payload: Option<String>,
    #[prost(string, optional, tag = "7")]
    pub env_version: Option<String>,
    #[prost(int32, optional, tag = "8")]
    pub pid: Option<i32>,
    #[prost(string, optional, tag = "9")]
    pub hostname: Option<String>,
    #[prost(message, repeated, tag = "10")]
    pub fields: Vec<WireField>,
}

impl WireField {
    fn into_value(self) -> Option<(String, FieldValue)> {
        let WireField {
            name,
            value_string,
            value_bytes,
            value_int,
            value_double,
            value_bool,
        } = self;
        let value = if let Some(s) = value_string {
            FieldValue::String(s)
        } else if let Some(b) = value_bytes {
            FieldValue::Bytes(b)
        } else if let Some(i) = value_int {
            FieldValue::Int(i)
        } else if let Some(d) = value_double {
            FieldValue::Float(d)
        } else if let Some(b) = value_bool {
            FieldValue::Bool(b)
        } else {
            return None;
        };
        Some((name, value))
    }

    fn from_value(name: &str, value: &FieldValue) -> Self {
        let mut field = WireField {
            name: name.to_string(),
            ..Default::default()
        };
        match value {
            FieldValue::String(s) => field.value_string = Some(s.clone()),
            FieldValue::Bytes(b) => field.value_bytes = Some(b.clone()),
            FieldValue::Int(i) => field.value_int = Some(*i),
            FieldValue::Float(f) => field.value_double = Some(*f),
            FieldValue::Bool(b) => field.value_bool = Some(*b),
        }
        field
    }
}

impl Message {
    /// Decode a protobuf envelope into a message
    pub fn from_protobuf(bytes: &[u8]) -> Result<Message, DecodeError> {
        let wire = WireMessage::decode(bytes)?;
        let mut msg = Message::new();

        if let Some(raw) = wire.uuid {
            let bytes: [u8; 16] = raw
                .as_slice()
                .try_into()
                .map_err(|_| DecodeError::UuidLength(raw.len()))?;
            msg.set_uuid(Uuid::from_bytes(bytes));
        }
        if let Some(ts) = wire.timestamp {
            msg.set_timestamp(ts);
        }
        if let Some(t) = wire.msg_type {
            msg.set_msg_type(t);
        }
        if let Some(l) = wire.logger {
            msg.set_logger(l);
        }
        if let Some(s) = wire.severity {
            msg.set_severity(s);
        }
        if let Some(p) = wire.payload {
            msg.set_payload(p);
        }
        if let Some(v) = wire.env_version {
            msg.set_env_version(v);
        }
        if let Some(p) = wire.pid {
            msg.set_pid(p);
        }
        if let Some(h) = wire.hostname {
            msg.set_hostname(h);
        }
        for field in wire.fields {
            if let Some((name, value)) = field.into_value() {
                msg.set_field(name, value);
            }
        }

        Ok(msg)
    }

    /// Encode this message as a protobuf envelope
    pub fn to_protobuf(&self) -> Vec<u8> {
        let wire = WireMessage {
            uuid: self.uuid().map(|u| u.as_bytes().to_vec()),
            timestamp: Some(self.timestamp()),
            msg_type: self.msg_type().map(str::to_string),
            logger: self.logger().map(str::to_string),
            severity: Some(self.severity()),
            payload: Some(self.payload().to_string()),
            env_version: self.env_version().map(str::to_string),
            pid: Some(self.pid()),
            hostname: self.hostname().map(str::to_string),
            fields: self
                .fields()
                .map(|(name, value)| WireField::from_value(name, value))
                .collect(),
        };
        wire.encode_to_vec()
    }
}
