//! Infrastructure layer: event storage, serialization, repositories and
//! command dispatch.

pub mod command_dispatcher;
pub mod decorator;
pub mod event_store;
pub mod repository;
pub mod serialization;

mod integration_tests;

pub use command_dispatcher::{CommandDispatcher, DispatchError};
pub use decorator::{EventStreamDecorator, MetaDataDecorator};
pub use event_store::{
    EventCriteria, EventEntryStore, EventStore, EventStoreConfig, EventStoreError,
    EventStoreManagement, InMemoryEventEntryStore, InMemoryEventStore, PartialStreamSupport,
    PostgresEventEntryStore, SerializingEventStore, SnapshotEventStore, StorageError,
};
pub use repository::{EventSourcingRepository, RepositoryError, SnapshotTrigger};
pub use serialization::{
    JsonSerializer, SerializationError, SerializedObject, SerializedType, Serializer,
    UnknownSerializedType, Upcaster, UpcasterChain, UpcastingContext,
};
