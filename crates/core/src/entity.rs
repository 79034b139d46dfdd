//! Event handler tables for aggregate roots and the entities they contain.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use crate::message::{DomainEventMessage, EventMessage};
use crate::payload::PayloadType;

type Handler<T> = Box<dyn Fn(&mut T, &DomainEventMessage) + Send + Sync>;
type ChildDispatch<T> = Box<dyn Fn(&mut T, &DomainEventMessage) -> usize + Send + Sync>;

/// Static registration table mapping event payload types to handler functions
/// for one entity type `T`.
///
/// Child entities are registered with an accessor returning the entity
/// instances currently owned by `T`; every event handled by `T` is forwarded to
/// each of them (recursively, if they declare children of their own).
pub struct EntityModel<T> {
    handlers: HashMap<TypeId, (PayloadType, Handler<T>)>,
    children: Vec<ChildDispatch<T>>,
}

impl<T: 'static> EntityModel<T> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            children: Vec::new(),
        }
    }

    /// Register the handler for events with payload `E`.
    ///
    /// Registering a second handler for the same payload type replaces the first.
    pub fn on<E, F>(&mut self, handler: F) -> &mut Self
    where
        E: Any + Send + Sync,
        F: Fn(&mut T, &E) + Send + Sync + 'static,
    {
        self.on_message::<E, _>(move |target, event, _| handler(target, event))
    }

    /// Register a handler that also needs the surrounding message (sequence
    /// number, metadata, timestamp).
    pub fn on_message<E, F>(&mut self, handler: F) -> &mut Self
    where
        E: Any + Send + Sync,
        F: Fn(&mut T, &E, &DomainEventMessage) + Send + Sync + 'static,
    {
        let erased: Handler<T> = Box::new(move |target, message| {
            if let Some(event) = message.payload().downcast_ref::<E>() {
                handler(target, event, message);
            }
        });
        self.handlers
            .insert(TypeId::of::<E>(), (PayloadType::of::<E>(), erased));
        self
    }

    /// Register child entities of type `C` reachable through `access`.
    pub fn entities<C, F>(&mut self, access: F, model: EntityModel<C>) -> &mut Self
    where
        C: 'static,
        F: for<'a> Fn(&'a mut T) -> Vec<&'a mut C> + Send + Sync + 'static,
    {
        self.children.push(Box::new(move |target, message| {
            let mut handled = 0;
            for child in access(target) {
                handled += model.handle(child, message);
            }
            handled
        }));
        self
    }

    /// Whether this table (not counting children) has a handler for `payload_type`.
    pub fn handles(&self, payload_type: &PayloadType) -> bool {
        self.handlers.contains_key(&payload_type.type_id())
    }

    /// Payload types this table has handlers for.
    pub fn payload_types(&self) -> impl Iterator<Item = &PayloadType> {
        self.handlers.values().map(|(payload_type, _)| payload_type)
    }

    /// Dispatch `message` to the matching handler on `target`, then to all child
    /// entities. Returns the number of handler invocations.
    pub fn handle(&self, target: &mut T, message: &DomainEventMessage) -> usize {
        let mut handled = 0;
        if let Some((_, handler)) = self.handlers.get(&message.payload().payload_type().type_id()) {
            handler(target, message);
            handled += 1;
        }
        for child in &self.children {
            handled += child(target, message);
        }
        handled
    }
}

impl<T: 'static> Default for EntityModel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for EntityModel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityModel")
            .field(
                "handlers",
                &self
                    .handlers
                    .values()
                    .map(|(payload_type, _)| payload_type.simple_name())
                    .collect::<Vec<_>>(),
            )
            .field("children", &self.children.len())
            .finish()
    }
}
