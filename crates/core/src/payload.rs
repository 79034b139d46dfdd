//! Type-erased message payloads.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Runtime description of a payload type.
///
/// Handler tables and parameter resolvers are keyed by payload type, so this is
/// what replaces class literals in dispatch decisions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PayloadType {
    type_id: TypeId,
    type_name: &'static str,
}

impl PayloadType {
    pub fn of<T: Any>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Fully qualified Rust type name.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The last path segment of the type name (generic arguments stripped).
    pub fn simple_name(&self) -> &'static str {
        simple_type_name(self.type_name)
    }

    pub fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

/// Strip the module path and generic arguments from a Rust type name.
pub fn simple_type_name(full: &'static str) -> &'static str {
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
}

/// The payload of a message.
///
/// Payloads are immutable and shared: cloning a payload clones an `Arc`.
#[derive(Clone)]
pub struct Payload {
    value: Arc<dyn Any + Send + Sync>,
    payload_type: PayloadType,
}

impl Payload {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            payload_type: PayloadType::of::<T>(),
        }
    }

    /// Wrap an already shared value without copying it.
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            value,
            payload_type: PayloadType::of::<T>(),
        }
    }

    pub fn payload_type(&self) -> PayloadType {
        self.payload_type
    }

    pub fn is<T: Any>(&self) -> bool {
        self.payload_type.is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Shared handle on the typed value, if the payload is a `T`.
    pub fn downcast_arc<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }

    pub fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self.value.as_ref()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("type", &self.payload_type.type_name())
            .finish_non_exhaustive()
    }
}
