use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use keel_core::{Payload, PayloadType};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use super::{SerializationError, SerializedObject, SerializedType, Serializer, UnknownSerializedType};

type SerializeFn = Box<dyn Fn(&Payload) -> Option<serde_json::Result<JsonValue>> + Send + Sync>;
type DeserializeFn = Box<dyn Fn(JsonValue) -> serde_json::Result<Payload> + Send + Sync>;

struct Registration {
    serialized_type: SerializedType,
    serialize: SerializeFn,
    deserialize: DeserializeFn,
}

/// serde_json serializer with an explicit table of payload types.
///
/// Types are looked up by their exact `(name, revision)` pair on the way in.
/// A stored record with an older revision is unknown until an upcaster
/// rewrites it to the registered one.
///
/// ```
/// # use keel_infra::serialization::{JsonSerializer, Serializer};
/// # use keel_core::Payload;
/// #[derive(serde::Serialize, serde::Deserialize)]
/// struct Deposited { amount: u64 }
///
/// let serializer = JsonSerializer::new().register::<Deposited>("account.deposited");
/// let object = serializer.serialize(&Payload::new(Deposited { amount: 5 })).unwrap();
/// assert_eq!(object.serialized_type.name, "account.deposited");
/// ```
#[derive(Default)]
pub struct JsonSerializer {
    by_payload: HashMap<TypeId, Arc<Registration>>,
    by_serialized_type: HashMap<SerializedType, Arc<Registration>>,
}

impl JsonSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T>(self, name: impl Into<String>) -> Self
    where
        T: Serialize + DeserializeOwned + Any + Send + Sync,
    {
        self.register_type::<T>(SerializedType::named(name))
    }

    pub fn register_revision<T>(self, name: impl Into<String>, revision: impl Into<String>) -> Self
    where
        T: Serialize + DeserializeOwned + Any + Send + Sync,
    {
        self.register_type::<T>(SerializedType::with_revision(name, revision))
    }

    fn register_type<T>(mut self, serialized_type: SerializedType) -> Self
    where
        T: Serialize + DeserializeOwned + Any + Send + Sync,
    {
        let registration = Arc::new(Registration {
            serialized_type: serialized_type.clone(),
            serialize: Box::new(|payload: &Payload| {
                payload.downcast_ref::<T>().map(serde_json::to_value)
            }),
            deserialize: Box::new(|data: JsonValue| {
                serde_json::from_value::<T>(data).map(Payload::new)
            }),
        });
        self.by_payload.insert(TypeId::of::<T>(), registration.clone());
        self.by_serialized_type.insert(serialized_type, registration);
        self
    }

    pub fn registered_types(&self) -> impl Iterator<Item = &SerializedType> {
        self.by_serialized_type.keys()
    }
}

impl Serializer for JsonSerializer {
    fn serialize(&self, payload: &Payload) -> Result<SerializedObject, SerializationError> {
        if let Some(unknown) = payload.downcast_ref::<UnknownSerializedType>() {
            return Ok(unknown.object().clone());
        }

        let payload_type = payload.payload_type();
        let registration = self
            .by_payload
            .get(&payload_type.type_id())
            .ok_or_else(|| SerializationError::UnregisteredType(payload_type.type_name().to_string()))?;

        match (registration.serialize)(payload) {
            Some(Ok(data)) => Ok(SerializedObject::new(data, registration.serialized_type.clone())),
            Some(Err(err)) => Err(SerializationError::Serialize {
                type_name: payload_type.type_name().to_string(),
                reason: err.to_string(),
            }),
            None => Err(SerializationError::UnregisteredType(
                payload_type.type_name().to_string(),
            )),
        }
    }

    fn deserialize(&self, object: &SerializedObject) -> Result<Payload, SerializationError> {
        let Some(registration) = self.by_serialized_type.get(&object.serialized_type) else {
            return Ok(Payload::new(UnknownSerializedType::new(object.clone())));
        };
        (registration.deserialize)(object.data.clone()).map_err(|err| {
            SerializationError::Deserialize {
                serialized_type: object.serialized_type.to_string(),
                reason: err.to_string(),
            }
        })
    }

    fn type_for(&self, payload_type: &PayloadType) -> Option<SerializedType> {
        self.by_payload
            .get(&payload_type.type_id())
            .map(|r| r.serialized_type.clone())
    }

    fn can_deserialize(&self, serialized_type: &SerializedType) -> bool {
        self.by_serialized_type.contains_key(serialized_type)
    }
}

impl fmt::Debug for JsonSerializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self
            .by_serialized_type
            .keys()
            .map(ToString::to_string)
            .collect();
        names.sort();
        f.debug_struct("JsonSerializer").field("types", &names).finish()
    }
}
