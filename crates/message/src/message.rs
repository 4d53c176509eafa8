//! The in-memory message record
//!
//! `Message` is the unit of work for the whole pipeline: decoders produce
//! one, matchers evaluate predicates over one, outputs render one. The
//! struct is designed for reuse - `clear()` resets the envelope while
//! keeping allocated capacity, so pooled carriers do not churn the
//! allocator.

use std::collections::BTreeMap;

use uuid::Uuid;

/// A typed dynamic field value
///
/// Messages carry an open set of named fields next to the fixed envelope.
/// Values are restricted to the scalar types the matcher language can
/// compare.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(String),
    Bytes(Vec<u8>),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl FieldValue {
    /// Get the value as a string slice, if it is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the value as an integer, if it is one
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get the value as a float, widening integers
    pub fn as_float(&self) -> Option<f64> {
        match self {
            FieldValue::Float(f) => Some(*f),
            FieldValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Get the value as a bool, if it is one
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Int(i)
    }
}

impl From<f64> for FieldValue {
    fn from(f: f64) -> Self {
        FieldValue::Float(f)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

/// The uniform in-memory message
///
/// The fixed envelope mirrors what inputs can cheaply provide (timestamps,
/// origin host and pid, a severity and a free-form payload); everything
/// else goes into dynamic `fields`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    /// Nanoseconds since the unix epoch
    timestamp: i64,
    uuid: Option<Uuid>,
    msg_type: Option<String>,
    logger: Option<String>,
    severity: i32,
    payload: String,
    env_version: Option<String>,
    pid: i32,
    hostname: Option<String>,
    /// Verified signer name, set by inputs that authenticate senders
    signer: Option<String>,
    fields: BTreeMap<String, FieldValue>,
}

impl Message {
    /// Create an empty message
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    #[inline]
    pub fn set_timestamp(&mut self, ns: i64) {
        self.timestamp = ns;
    }

    #[inline]
    pub fn uuid(&self) -> Option<Uuid> {
        self.uuid
    }

    #[inline]
    pub fn set_uuid(&mut self, uuid: Uuid) {
        self.uuid = Some(uuid);
    }

    #[inline]
    pub fn msg_type(&self) -> Option<&str> {
        self.msg_type.as_deref()
    }

    #[inline]
    pub fn set_msg_type(&mut self, msg_type: impl Into<String>) {
        self.msg_type = Some(msg_type.into());
    }

    #[inline]
    pub fn logger(&self) -> Option<&str> {
        self.logger.as_deref()
    }

    #[inline]
    pub fn set_logger(&mut self, logger: impl Into<String>) {
        self.logger = Some(logger.into());
    }

    #[inline]
    pub fn severity(&self) -> i32 {
        self.severity
    }

    #[inline]
    pub fn set_severity(&mut self, severity: i32) {
        self.severity = severity;
    }

    #[inline]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    #[inline]
    pub fn set_payload(&mut self, payload: impl Into<String>) {
        self.payload = payload.into();
    }

    #[inline]
    pub fn env_version(&self) -> Option<&str> {
        self.env_version.as_deref()
    }

    #[inline]
    pub fn set_env_version(&mut self, version: impl Into<String>) {
        self.env_version = Some(version.into());
    }

    #[inline]
    pub fn pid(&self) -> i32 {
        self.pid
    }

    #[inline]
    pub fn set_pid(&mut self, pid: i32) {
        self.pid = pid;
    }

    #[inline]
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    #[inline]
    pub fn set_hostname(&mut self, hostname: impl Into<String>) {
        self.hostname = Some(hostname.into());
    }

    #[inline]
    pub fn signer(&self) -> Option<&str> {
        self.signer.as_deref()
    }

    #[inline]
    pub fn set_signer(&mut self, signer: impl Into<String>) {
        self.signer = Some(signer.into());
    }

    /// Look up a dynamic field by name
    #[inline]
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Set a dynamic field, replacing any previous value
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Iterate over all dynamic fields in name order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Reset the message for reuse, keeping the payload's capacity
    pub fn clear(&mut self) {
        self.timestamp = 0;
        self.uuid = None;
        self.msg_type = None;
        self.logger = None;
        self.severity = 0;
        self.payload.clear();
        self.env_version = None;
        self.pid = 0;
        self.hostname = None;
        self.signer = None;
        self.fields.clear();
    }
}
