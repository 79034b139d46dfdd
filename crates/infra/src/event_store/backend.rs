//! Storage collaborator behind [`SerializingEventStore`](super::SerializingEventStore).
//!
//! An [`EventEntryStore`] persists already serialized records. It knows
//! nothing about payload types, upcasting or snapshots beyond "the latest
//! record in a second table", which keeps backends small: the in-memory store
//! and the Postgres store implement the same handful of operations.

use chrono::{DateTime, Utc};
use keel_core::{AggregateId, EventId, GlobalIndexToken};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use super::query::EventCriteria;
use crate::serialization::SerializedObject;

/// One stored event (or snapshot) record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEntry {
    pub event_identifier: EventId,
    pub aggregate_type: String,
    pub aggregate_identifier: AggregateId,
    pub sequence_number: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: SerializedObject,
    pub meta_data: JsonValue,
}

impl EventEntry {
    pub fn position(&self) -> EntryPosition {
        EntryPosition {
            timestamp: self.timestamp,
            sequence_number: self.sequence_number,
            event_identifier: self.event_identifier,
        }
    }
}

/// An entry together with its global insertion index.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedEntry {
    pub token: GlobalIndexToken,
    pub entry: EventEntry,
}

/// Sort key of filtered reads: timestamp, then sequence number, with the event
/// identifier breaking ties between streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EntryPosition {
    pub timestamp: DateTime<Utc>,
    pub sequence_number: u64,
    pub event_identifier: EventId,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// A record with the same event identifier, or the same
    /// `(aggregate_type, aggregate_identifier, sequence_number)`, exists.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StorageError::DuplicateKey(_))
    }
}

/// Persistence of serialized event entries.
///
/// ## Requirements
///
/// - `persist_events` is atomic: either every entry is stored or none is.
/// - `(aggregate_type, aggregate_identifier, sequence_number)` and
///   `event_identifier` are unique across all stored events; a violation is
///   reported as [`StorageError::DuplicateKey`], also within a single batch.
/// - Stream batches are ordered by sequence number.
/// - Snapshots live apart from events; storing a snapshot at an existing
///   sequence number replaces it.
pub trait EventEntryStore: Send + Sync {
    fn persist_events(&self, entries: Vec<EventEntry>) -> Result<(), StorageError>;

    /// Up to `batch_size` entries of one stream with `sequence_number >= first_sequence`.
    fn fetch_stream_batch(
        &self,
        aggregate_type: &str,
        aggregate_identifier: &AggregateId,
        first_sequence: u64,
        batch_size: usize,
    ) -> Result<Vec<EventEntry>, StorageError>;

    fn load_last_snapshot(
        &self,
        aggregate_type: &str,
        aggregate_identifier: &AggregateId,
    ) -> Result<Option<EventEntry>, StorageError>;

    fn persist_snapshot(&self, entry: EventEntry) -> Result<(), StorageError>;

    /// Delete all but the `keep` most recent snapshots of a stream. Returns the
    /// number of deleted snapshots.
    fn prune_snapshots(
        &self,
        aggregate_type: &str,
        aggregate_identifier: &AggregateId,
        keep: usize,
    ) -> Result<usize, StorageError>;

    /// Up to `batch_size` entries matching `criteria`, ordered by
    /// [`EntryPosition`], strictly after `after` when given.
    fn fetch_filtered_batch(
        &self,
        criteria: &EventCriteria,
        after: Option<&EntryPosition>,
        batch_size: usize,
    ) -> Result<Vec<EventEntry>, StorageError>;

    /// Up to `limit` entries in global insertion order, strictly after `after`.
    fn fetch_tracked(
        &self,
        after: Option<GlobalIndexToken>,
        limit: usize,
    ) -> Result<Vec<TrackedEntry>, StorageError>;
}

impl<S: EventEntryStore + ?Sized> EventEntryStore for std::sync::Arc<S> {
    fn persist_events(&self, entries: Vec<EventEntry>) -> Result<(), StorageError> {
        (**self).persist_events(entries)
    }

    fn fetch_stream_batch(
        &self,
        aggregate_type: &str,
        aggregate_identifier: &AggregateId,
        first_sequence: u64,
        batch_size: usize,
    ) -> Result<Vec<EventEntry>, StorageError> {
        (**self).fetch_stream_batch(aggregate_type, aggregate_identifier, first_sequence, batch_size)
    }

    fn load_last_snapshot(
        &self,
        aggregate_type: &str,
        aggregate_identifier: &AggregateId,
    ) -> Result<Option<EventEntry>, StorageError> {
        (**self).load_last_snapshot(aggregate_type, aggregate_identifier)
    }

    fn persist_snapshot(&self, entry: EventEntry) -> Result<(), StorageError> {
        (**self).persist_snapshot(entry)
    }

    fn prune_snapshots(
        &self,
        aggregate_type: &str,
        aggregate_identifier: &AggregateId,
        keep: usize,
    ) -> Result<usize, StorageError> {
        (**self).prune_snapshots(aggregate_type, aggregate_identifier, keep)
    }

    fn fetch_filtered_batch(
        &self,
        criteria: &EventCriteria,
        after: Option<&EntryPosition>,
        batch_size: usize,
    ) -> Result<Vec<EventEntry>, StorageError> {
        (**self).fetch_filtered_batch(criteria, after, batch_size)
    }

    fn fetch_tracked(
        &self,
        after: Option<GlobalIndexToken>,
        limit: usize,
    ) -> Result<Vec<TrackedEntry>, StorageError> {
        (**self).fetch_tracked(after, limit)
    }
}
