//! Payload and metadata serialization for stored events.
//!
//! Stored payloads are JSON documents tagged with a [`SerializedType`]
//! (a stable type name plus an optional revision). The type name is what
//! survives refactorings: Rust type paths never reach the database.
//!
//! ## Unknown types
//!
//! A record whose type is not known to the serializer is not an error. It
//! deserializes to an [`UnknownSerializedType`] payload carrying the original
//! document, so a single obsolete event cannot make a whole stream unreadable.
//! Aggregates simply have no handler for it.

mod json;
pub mod upcasting;

use keel_core::{MetaData, Payload, PayloadType};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub use json::JsonSerializer;
pub use upcasting::{Upcaster, UpcasterChain, UpcastingContext};

/// Stable name (and optional revision) of a serialized payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SerializedType {
    pub name: String,
    pub revision: Option<String>,
}

impl SerializedType {
    pub fn new(name: impl Into<String>, revision: Option<String>) -> Self {
        Self {
            name: name.into(),
            revision,
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, None)
    }

    pub fn with_revision(name: impl Into<String>, revision: impl Into<String>) -> Self {
        Self::new(name, Some(revision.into()))
    }
}

impl std::fmt::Display for SerializedType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.revision {
            Some(revision) => write!(f, "{}@{}", self.name, revision),
            None => f.write_str(&self.name),
        }
    }
}

/// A serialized payload together with its type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedObject {
    pub data: JsonValue,
    pub serialized_type: SerializedType,
}

impl SerializedObject {
    pub fn new(data: JsonValue, serialized_type: SerializedType) -> Self {
        Self {
            data,
            serialized_type,
        }
    }
}

/// Placeholder payload for records whose type cannot be resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownSerializedType {
    object: SerializedObject,
}

impl UnknownSerializedType {
    pub fn new(object: SerializedObject) -> Self {
        Self { object }
    }

    pub fn serialized_type(&self) -> &SerializedType {
        &self.object.serialized_type
    }

    pub fn data(&self) -> &JsonValue {
        &self.object.data
    }

    pub fn into_object(self) -> SerializedObject {
        self.object
    }

    pub(crate) fn object(&self) -> &SerializedObject {
        &self.object
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SerializationError {
    #[error("no serialized type registered for payload {0}")]
    UnregisteredType(String),

    #[error("cannot serialize {type_name}: {reason}")]
    Serialize { type_name: String, reason: String },

    #[error("cannot deserialize {serialized_type}: {reason}")]
    Deserialize {
        serialized_type: String,
        reason: String,
    },

    #[error("invalid meta data: {0}")]
    MetaData(String),

    #[error("upcasting failed: {0}")]
    Upcasting(String),
}

/// Converts payloads and metadata to and from their stored form.
pub trait Serializer: Send + Sync {
    fn serialize(&self, payload: &Payload) -> Result<SerializedObject, SerializationError>;

    /// Unknown types yield an [`UnknownSerializedType`] payload.
    fn deserialize(&self, object: &SerializedObject) -> Result<Payload, SerializationError>;

    fn serialize_meta_data(&self, meta_data: &MetaData) -> Result<JsonValue, SerializationError> {
        serde_json::to_value(meta_data).map_err(|e| SerializationError::MetaData(e.to_string()))
    }

    fn deserialize_meta_data(&self, value: &JsonValue) -> Result<MetaData, SerializationError> {
        if value.is_null() {
            return Ok(MetaData::empty());
        }
        MetaData::deserialize(value).map_err(|e| SerializationError::MetaData(e.to_string()))
    }

    /// The serialized type a payload of `payload_type` is stored under.
    fn type_for(&self, payload_type: &PayloadType) -> Option<SerializedType>;

    fn can_deserialize(&self, serialized_type: &SerializedType) -> bool;
}

impl<S: Serializer + ?Sized> Serializer for std::sync::Arc<S> {
    fn serialize(&self, payload: &Payload) -> Result<SerializedObject, SerializationError> {
        (**self).serialize(payload)
    }

    fn deserialize(&self, object: &SerializedObject) -> Result<Payload, SerializationError> {
        (**self).deserialize(object)
    }

    fn serialize_meta_data(&self, meta_data: &MetaData) -> Result<JsonValue, SerializationError> {
        (**self).serialize_meta_data(meta_data)
    }

    fn deserialize_meta_data(&self, value: &JsonValue) -> Result<MetaData, SerializationError> {
        (**self).deserialize_meta_data(value)
    }

    fn type_for(&self, payload_type: &PayloadType) -> Option<SerializedType> {
        (**self).type_for(payload_type)
    }

    fn can_deserialize(&self, serialized_type: &SerializedType) -> bool {
        (**self).can_deserialize(serialized_type)
    }
}
