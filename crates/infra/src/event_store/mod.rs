//! Append-only event store boundary.
//!
//! [`EventStore`] and its companion traits describe what the rest of the
//! framework needs from storage. [`SerializingEventStore`] implements all of
//! them on top of a small [`EventEntryStore`] backend that only moves
//! serialized records around.

pub mod backend;
pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod serializing;
pub mod r#trait;

pub use backend::{EntryPosition, EventEntry, EventEntryStore, StorageError, TrackedEntry};
pub use in_memory::InMemoryEventEntryStore;
pub use postgres::PostgresEventEntryStore;
pub use query::{EventCriteria, TimestampBound};
pub use serializing::{EventStoreConfig, SerializingEventStore};
pub use r#trait::{
    EventStore, EventStoreError, EventStoreManagement, PartialStreamSupport, SnapshotEventStore,
};

/// In-memory store for tests and development.
pub type InMemoryEventStore = SerializingEventStore<InMemoryEventEntryStore>;
