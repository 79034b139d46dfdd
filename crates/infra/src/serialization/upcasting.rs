//! Rewriting obsolete stored representations before deserialization.
//!
//! An [`Upcaster`] converts one serialized object into zero or more objects of
//! a newer representation. Upcasters are chained: the output of one upcaster is
//! offered to all upcasters after it, never to itself or earlier ones, so a
//! chain always terminates.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use keel_core::{AggregateId, EventId, MetaData};

use super::{SerializationError, SerializedObject, SerializedType};

/// The stored record an object being upcast belongs to.
#[derive(Debug, Clone, Copy)]
pub struct UpcastingContext<'a> {
    pub identifier: EventId,
    pub aggregate_identifier: &'a AggregateId,
    pub sequence_number: u64,
    pub timestamp: DateTime<Utc>,
    pub meta_data: &'a MetaData,
}

pub trait Upcaster: Send + Sync {
    fn can_upcast(&self, serialized_type: &SerializedType) -> bool;

    /// Returning an empty vector drops the record; returning several objects
    /// expands it into several events sharing the record's position.
    fn upcast(
        &self,
        object: SerializedObject,
        context: &UpcastingContext<'_>,
    ) -> Result<Vec<SerializedObject>, SerializationError>;
}

/// Ordered upcasters applied to every stored payload.
#[derive(Clone, Default)]
pub struct UpcasterChain {
    upcasters: Vec<Arc<dyn Upcaster>>,
}

impl UpcasterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, upcaster: impl Upcaster + 'static) -> Self {
        self.upcasters.push(Arc::new(upcaster));
        self
    }

    pub fn push(&mut self, upcaster: Arc<dyn Upcaster>) {
        self.upcasters.push(upcaster);
    }

    pub fn is_empty(&self) -> bool {
        self.upcasters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.upcasters.len()
    }

    pub fn upcast(
        &self,
        object: SerializedObject,
        context: &UpcastingContext<'_>,
    ) -> Result<Vec<SerializedObject>, SerializationError> {
        let mut output = Vec::with_capacity(1);
        self.upcast_from(0, object, context, &mut output)?;
        Ok(output)
    }

    fn upcast_from(
        &self,
        start: usize,
        object: SerializedObject,
        context: &UpcastingContext<'_>,
        output: &mut Vec<SerializedObject>,
    ) -> Result<(), SerializationError> {
        let next = self.upcasters[start..]
            .iter()
            .position(|u| u.can_upcast(&object.serialized_type))
            .map(|offset| start + offset);

        let Some(index) = next else {
            output.push(object);
            return Ok(());
        };

        for upcast in self.upcasters[index].upcast(object, context)? {
            self.upcast_from(index + 1, upcast, context, output)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for UpcasterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpcasterChain")
            .field("upcasters", &self.upcasters.len())
            .finish()
    }
}
