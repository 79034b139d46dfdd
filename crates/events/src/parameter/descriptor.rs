//! Static descriptions of handler parameters and the values resolved for them.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use keel_core::{EventMessage, EventRef, MetaData, Payload, PayloadType};
use serde_json::Value as JsonValue;

/// JSON value kinds a metadata-backed parameter can declare.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Any JSON value, including `null`.
    Any,
    Bool,
    Integer,
    Float,
    String,
    Array,
    Object,
}

impl ValueKind {
    /// Whether `value` is an instance of this kind.
    pub fn accepts(self, value: &JsonValue) -> bool {
        match self {
            ValueKind::Any => true,
            ValueKind::Bool => value.is_boolean(),
            ValueKind::Integer => value.is_i64() || value.is_u64(),
            ValueKind::Float => value.is_number(),
            ValueKind::String => value.is_string(),
            ValueKind::Array => value.is_array(),
            ValueKind::Object => value.is_object(),
        }
    }
}

/// The declared type of a handler parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterType {
    /// Any event message.
    Message,
    /// Only domain event messages.
    DomainEventMessage,
    /// The full metadata map.
    MetaData,
    /// The message payload, which must be of the given type.
    Payload(PayloadType),
    /// A single JSON value. `primitive` parameters cannot take an absent value.
    Value { kind: ValueKind, primitive: bool },
    Timestamp,
    SequenceNumber,
    /// An injected resource of the given type.
    Resource(PayloadType),
}

/// Markers attached to a single parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterAnnotation {
    /// Resolve from the metadata entry `key`.
    MetaDataValue { key: String, required: bool },
    Timestamp,
    SequenceNumber,
}

/// A handler parameter: its declared type plus annotations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDescriptor {
    pub parameter_type: ParameterType,
    pub annotations: Vec<ParameterAnnotation>,
}

impl ParameterDescriptor {
    pub fn new(parameter_type: ParameterType) -> Self {
        Self {
            parameter_type,
            annotations: Vec::new(),
        }
    }

    pub fn message() -> Self {
        Self::new(ParameterType::Message)
    }

    pub fn domain_event_message() -> Self {
        Self::new(ParameterType::DomainEventMessage)
    }

    pub fn meta_data() -> Self {
        Self::new(ParameterType::MetaData)
    }

    pub fn payload<T: Any>() -> Self {
        Self::new(ParameterType::Payload(PayloadType::of::<T>()))
    }

    pub fn resource<T: Any>() -> Self {
        Self::new(ParameterType::Resource(PayloadType::of::<T>()))
    }

    /// A parameter bound to the metadata entry `key`.
    pub fn meta_data_value(key: impl Into<String>, kind: ValueKind) -> Self {
        Self::new(ParameterType::Value {
            kind,
            primitive: false,
        })
        .annotated(ParameterAnnotation::MetaDataValue {
            key: key.into(),
            required: false,
        })
    }

    pub fn timestamp() -> Self {
        Self::new(ParameterType::Timestamp).annotated(ParameterAnnotation::Timestamp)
    }

    pub fn sequence_number() -> Self {
        Self::new(ParameterType::SequenceNumber).annotated(ParameterAnnotation::SequenceNumber)
    }

    pub fn annotated(mut self, annotation: ParameterAnnotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    /// Mark the parameter as primitive (if it is a `Value` parameter).
    pub fn primitive(mut self) -> Self {
        if let ParameterType::Value { primitive, .. } = &mut self.parameter_type {
            *primitive = true;
        }
        self
    }

    /// Mark every metadata annotation on this parameter as required.
    pub fn required(mut self) -> Self {
        for annotation in &mut self.annotations {
            if let ParameterAnnotation::MetaDataValue { required, .. } = annotation {
                *required = true;
            }
        }
        self
    }

    pub fn meta_data_annotation(&self) -> Option<(&str, bool)> {
        self.annotations.iter().find_map(|a| match a {
            ParameterAnnotation::MetaDataValue { key, required } => Some((key.as_str(), *required)),
            _ => None,
        })
    }

    pub fn has_annotation(&self, annotation: &ParameterAnnotation) -> bool {
        self.annotations.contains(annotation)
    }
}

/// A resolved parameter value, handed to the handler invoker.
#[derive(Clone)]
pub enum ParameterValue {
    Message(EventRef),
    MetaData(MetaData),
    /// A metadata value; `None` when the key is absent.
    Value(Option<JsonValue>),
    Payload(Payload),
    Timestamp(DateTime<Utc>),
    SequenceNumber(u64),
    Resource(Arc<dyn Any + Send + Sync>),
}

impl ParameterValue {
    pub fn as_message(&self) -> Option<&EventRef> {
        match self {
            ParameterValue::Message(message) => Some(message),
            _ => None,
        }
    }

    pub fn as_meta_data(&self) -> Option<&MetaData> {
        match self {
            ParameterValue::MetaData(meta_data) => Some(meta_data),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&JsonValue> {
        match self {
            ParameterValue::Value(value) => value.as_ref(),
            _ => None,
        }
    }

    pub fn as_payload<T: Any>(&self) -> Option<&T> {
        match self {
            ParameterValue::Payload(payload) => payload.downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            ParameterValue::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn as_sequence_number(&self) -> Option<u64> {
        match self {
            ParameterValue::SequenceNumber(seq) => Some(*seq),
            _ => None,
        }
    }

    pub fn as_resource<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            ParameterValue::Resource(resource) => Arc::clone(resource).downcast::<T>().ok(),
            _ => None,
        }
    }
}

impl fmt::Debug for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Message(m) => f.debug_tuple("Message").field(&m.identifier()).finish(),
            ParameterValue::MetaData(m) => f.debug_tuple("MetaData").field(m).finish(),
            ParameterValue::Value(v) => f.debug_tuple("Value").field(v).finish(),
            ParameterValue::Payload(p) => f.debug_tuple("Payload").field(p).finish(),
            ParameterValue::Timestamp(t) => f.debug_tuple("Timestamp").field(t).finish(),
            ParameterValue::SequenceNumber(s) => f.debug_tuple("SequenceNumber").field(s).finish(),
            ParameterValue::Resource(_) => f.write_str("Resource(..)"),
        }
    }
}
