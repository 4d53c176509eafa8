//! JSON envelope codec
//!
//! Accepts the JSON shape of the message envelope. Unknown keys are
//! ignored; dynamic field values must be JSON scalars.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::DecodeError;
use crate::message::{FieldValue, Message};

#[derive(Debug, Default, Deserialize)]
struct JsonEnvelope {
    uuid: Option<Uuid>,
    timestamp: Option<i64>,
    #[serde(rename = "type")]
    msg_type: Option<String>,
    logger: Option<String>,
    severity: Option<i32>,
    payload: Option<String>,
    env_version: Option<String>,
    pid: Option<i32>,
    hostname: Option<String>,
    #[serde(default)]
    fields: BTreeMap<String, Value>,
}

fn field_value(name: &str, value: Value) -> Result<FieldValue, DecodeError> {
    match value {
        Value::String(s) => Ok(FieldValue::String(s)),
        Value::Bool(b) => Ok(FieldValue::Bool(b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(FieldValue::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(FieldValue::Float(f))
            } else {
                Err(DecodeError::UnsupportedField(name.to_string()))
            }
        }
        // Arrays, objects and nulls have no FieldValue representation
        _ => Err(DecodeError::UnsupportedField(name.to_string())),
    }
}

impl Message {
    /// Decode a JSON envelope into a message
    pub fn from_json(bytes: &[u8]) -> Result<Message, DecodeError> {
        let envelope: JsonEnvelope = serde_json::from_slice(bytes)?;
        let mut msg = Message::new();

        if let Some(u) = envelope.uuid {
            msg.set_uuid(u);
        }
        if let Some(ts) = envelope.timestamp {
            msg.set_timestamp(ts);
        }
        if let Some(t) = envelope.msg_type {
            msg.set_msg_type(t);
        }
        if let Some(l) = envelope.logger {
            msg.set_logger(l);
        }
        if let Some(s) = envelope.severity {
            msg.set_severity(s);
        }
        if let Some(p) = envelope.payload {
            msg.set_payload(p);
        }
        if let Some(v) = envelope.env_version {
            msg.set_env_version(v);
        }
        if let Some(p) = envelope.pid {
            msg.set_pid(p);
        }
        if let Some(h) = envelope.hostname {
            msg.set_hostname(h);
        }
        for (name, raw) in envelope.fields {
            let value = field_value(&name, raw)?;
            msg.set_field(name, value);
        }

        Ok(msg)
    }
}
