//! Event model: the payload handed to local processing and the unit of
//! replication sent to the passive node.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A single attribute value of an [`Event`].
///
/// `Object` carries an opaque host value. It can be forwarded to local
/// processing but cannot be put on the wire.
#[derive(Clone)]
pub enum Attribute {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Object(Arc<dyn Any + Send + Sync>),
}

impl Attribute {
    /// Name of the attribute type, used in logs and encoding errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::Object(_) => "object",
        }
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "Null"),
            Self::Bool(v) => write!(f, "Bool({})", v),
            Self::Int(v) => write!(f, "Int({})", v),
            Self::Long(v) => write!(f, "Long({})", v),
            Self::Float(v) => write!(f, "Float({})", v),
            Self::Double(v) => write!(f, "Double({})", v),
            Self::String(v) => write!(f, "String({:?})", v),
            Self::Object(_) => write!(f, "Object(..)"),
        }
    }
}

impl PartialEq for Attribute {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Long(a), Self::Long(b)) => a == b,
            // Bitwise so that NaN payloads survive a round trip comparison
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for Attribute {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Attribute {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for Attribute {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f32> for Attribute {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<f64> for Attribute {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Attribute {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Attribute {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// A timestamped event as delivered by an input source.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event time in epoch milliseconds.
    pub timestamp: i64,
    /// Ordered attribute values.
    pub data: Vec<Attribute>,
}

impl Event {
    pub fn new(timestamp: i64, data: Vec<Attribute>) -> Self {
        Self { timestamp, data }
    }
}

/// One event as replicated to the passive node.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEvent {
    /// App the originating source belongs to.
    pub app_name: String,
    /// Identifies which source handler within the app produced the event.
    pub source_handler_id: String,
    /// Process-wide order number, see [`crate::sequence::SequenceGenerator`].
    pub sequence_id: u64,
    pub event: Event,
    /// Transport resume tokens. Only the first event of a batch carries them.
    pub resume_markers: Option<Vec<String>>,
}

impl QueuedEvent {
    pub fn new(
        app_name: impl Into<String>,
        source_handler_id: impl Into<String>,
        sequence_id: u64,
        event: Event,
        resume_markers: Option<Vec<String>>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            source_handler_id: source_handler_id.into(),
            sequence_id,
            event,
            resume_markers,
        }
    }
}
