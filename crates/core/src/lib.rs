//! `keel-core`: event sourcing building blocks.
//!
//! This crate contains the **pure domain** side of the framework: identifiers,
//! messages, aggregate declarations and the guard that applies and replays
//! events. It has no storage or transport concerns.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod guard;
pub mod id;
pub mod message;
pub mod metadata;
pub mod payload;
pub mod tracking;

pub use aggregate::{
    AggregateConfiguration, AggregateModel, AggregateRegistry, EventSourcedAggregate,
    ExpectedVersion,
};
pub use entity::EntityModel;
pub use error::{DomainError, DomainResult, StreamError};
pub use guard::{EventSourcedAggregateGuard, Identity};
pub use id::{AggregateId, EventId};
pub use message::{DomainEventMessage, DomainEventStream, EventMessage, EventRef, GenericEventMessage};
pub use metadata::MetaData;
pub use payload::{Payload, PayloadType};
pub use tracking::{GlobalIndexToken, TrackedDomainEvent, TrackingToken};
