use std::sync::Arc;

use keel_core::{AggregateId, DomainEventMessage, DomainEventStream, GlobalIndexToken, StreamError, TrackedDomainEvent};
use thiserror::Error;

use super::backend::StorageError;
use super::query::EventCriteria;
use crate::serialization::SerializationError;

/// Event store operation error.
///
/// These are **infrastructure errors** (storage, concurrency, serialization) as
/// opposed to domain errors (validation, invariants).
///
/// ## Error Categories
///
/// - **Concurrency**: an event with the same identifier or the same stream
///   position was already stored. Callers may reload and retry.
/// - **StreamNotFound**: the aggregate has no events (and no snapshot).
/// - **Serialization**: a payload or metadata could not be converted.
/// - **Storage**: the backend failed for another reason.
/// - **Stream**: a lazily read batch failed after the stream was handed out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("no events found for aggregate {aggregate_type}/{aggregate_identifier}")]
    StreamNotFound {
        aggregate_type: String,
        aggregate_identifier: AggregateId,
    },

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error("storage failure: {0}")]
    Storage(StorageError),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl EventStoreError {
    pub fn stream_not_found(aggregate_type: &str, aggregate_identifier: &AggregateId) -> Self {
        EventStoreError::StreamNotFound {
            aggregate_type: aggregate_type.to_string(),
            aggregate_identifier: aggregate_identifier.clone(),
        }
    }

    pub fn is_concurrency_failure(&self) -> bool {
        matches!(self, EventStoreError::Concurrency(_))
    }
}

impl From<StorageError> for EventStoreError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::DuplicateKey(msg) => EventStoreError::Concurrency(msg),
            other => EventStoreError::Storage(other),
        }
    }
}

/// Append-only store of domain event streams.
///
/// The `EventStore` is the **persistence layer** for events. Events are stored
/// in streams, one stream per aggregate instance. The stream key is
/// `(aggregate_type, aggregate_identifier)`; within a stream, events have
/// consecutive sequence numbers starting at 0.
///
/// ## Append Semantics
///
/// `append_events()`:
/// - persists the events atomically (all or nothing)
/// - rejects an event whose identifier or stream position is already taken
///   with [`EventStoreError::Concurrency`], even when the conflicting event
///   was appended by a different process
///
/// There is no separate version check: two writers that loaded the same
/// version both produce the next sequence number, and the second append fails.
///
/// ## Read Semantics
///
/// `read_events()`:
/// - starts at the latest snapshot when one exists; the snapshot is the
///   first item of the stream, followed by the events after it
/// - returns events in sequence number order
/// - fails with [`EventStoreError::StreamNotFound`] when the aggregate has
///   neither events nor a snapshot
/// - reads lazily: storage failures after the first batch surface as stream
///   items
pub trait EventStore: Send + Sync {
    fn append_events(
        &self,
        aggregate_type: &str,
        events: &[DomainEventMessage],
    ) -> Result<(), EventStoreError>;

    fn read_events(
        &self,
        aggregate_type: &str,
        aggregate_identifier: &AggregateId,
    ) -> Result<DomainEventStream, EventStoreError>;
}

/// Reading part of a stream, ignoring snapshots.
pub trait PartialStreamSupport: EventStore {
    /// Events with `first <= sequence_number <= last` (to the end of the
    /// stream when `last` is `None`) in ascending order.
    ///
    /// Fails with [`EventStoreError::StreamNotFound`] only when the aggregate
    /// has no events at all; an empty range of an existing stream is an empty
    /// stream.
    fn read_events_range(
        &self,
        aggregate_type: &str,
        aggregate_identifier: &AggregateId,
        first: u64,
        last: Option<u64>,
    ) -> Result<DomainEventStream, EventStoreError>;
}

/// Storing aggregate snapshots.
pub trait SnapshotEventStore: EventStore {
    /// Store a snapshot (a domain event whose payload is the aggregate
    /// state at the snapshot's sequence number). Older snapshots beyond the
    /// configured archive size are pruned on a best-effort basis.
    fn append_snapshot_event(
        &self,
        aggregate_type: &str,
        snapshot: &DomainEventMessage,
    ) -> Result<(), EventStoreError>;
}

/// Store-wide access for replays and catch-up consumers.
pub trait EventStoreManagement: Send + Sync {
    /// Invoke `visitor` for every event matching `criteria`, ordered by
    /// timestamp then sequence number.
    fn visit_events(
        &self,
        criteria: &EventCriteria,
        visitor: &mut dyn FnMut(&DomainEventMessage),
    ) -> Result<(), EventStoreError>;

    /// Up to `limit` stored records after `after`, in global insertion order.
    /// Upcasting may expand a record into several events sharing one token.
    fn read_tracked(
        &self,
        after: Option<GlobalIndexToken>,
        limit: usize,
    ) -> Result<Vec<TrackedDomainEvent>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append_events(
        &self,
        aggregate_type: &str,
        events: &[DomainEventMessage],
    ) -> Result<(), EventStoreError> {
        (**self).append_events(aggregate_type, events)
    }

    fn read_events(
        &self,
        aggregate_type: &str,
        aggregate_identifier: &AggregateId,
    ) -> Result<DomainEventStream, EventStoreError> {
        (**self).read_events(aggregate_type, aggregate_identifier)
    }
}

impl<S> PartialStreamSupport for Arc<S>
where
    S: PartialStreamSupport + ?Sized,
{
    fn read_events_range(
        &self,
        aggregate_type: &str,
        aggregate_identifier: &AggregateId,
        first: u64,
        last: Option<u64>,
    ) -> Result<DomainEventStream, EventStoreError> {
        (**self).read_events_range(aggregate_type, aggregate_identifier, first, last)
    }
}

impl<S> SnapshotEventStore for Arc<S>
where
    S: SnapshotEventStore + ?Sized,
{
    fn append_snapshot_event(
        &self,
        aggregate_type: &str,
        snapshot: &DomainEventMessage,
    ) -> Result<(), EventStoreError> {
        (**self).append_snapshot_event(aggregate_type, snapshot)
    }
}

impl<S> EventStoreManagement for Arc<S>
where
    S: EventStoreManagement + ?Sized,
{
    fn visit_events(
        &self,
        criteria: &EventCriteria,
        visitor: &mut dyn FnMut(&DomainEventMessage),
    ) -> Result<(), EventStoreError> {
        (**self).visit_events(criteria, visitor)
    }

    fn read_tracked(
        &self,
        after: Option<GlobalIndexToken>,
        limit: usize,
    ) -> Result<Vec<TrackedDomainEvent>, EventStoreError> {
        (**self).read_tracked(after, limit)
    }
}
