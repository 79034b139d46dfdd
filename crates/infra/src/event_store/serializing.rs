//! Event store that serializes domain events onto an [`EventEntryStore`].

use std::collections::VecDeque;
use std::sync::Arc;

use keel_core::{
    AggregateId, DomainEventMessage, DomainEventStream, EventMessage, GlobalIndexToken, StreamError,
    TrackedDomainEvent,
};
use serde::{Deserialize, Serialize};
use tracing::{Span, debug, instrument, warn};

use super::backend::{EventEntry, EventEntryStore};
use super::query::EventCriteria;
use super::r#trait::{
    EventStore, EventStoreError, EventStoreManagement, PartialStreamSupport, SnapshotEventStore,
};
use crate::serialization::{
    SerializationError, Serializer, UnknownSerializedType, UpcasterChain, UpcastingContext,
};

/// Tuning knobs of a [`SerializingEventStore`].
///
/// Deserializable so it can be embedded in an application's settings file;
/// missing fields take their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventStoreConfig {
    /// Number of entries fetched per storage round trip.
    pub batch_size: usize,
    /// Snapshots kept per aggregate; older ones are pruned after a new
    /// snapshot is stored.
    pub max_snapshots_archived: usize,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_snapshots_archived: 2,
        }
    }
}

/// Shared decoding state: turns stored entries into domain events.
#[derive(Clone)]
struct Codec {
    serializer: Arc<dyn Serializer>,
    upcasters: Arc<UpcasterChain>,
}

impl Codec {
    fn encode(
        &self,
        aggregate_type: &str,
        event: &DomainEventMessage,
    ) -> Result<EventEntry, SerializationError> {
        Ok(EventEntry {
            event_identifier: event.identifier(),
            aggregate_type: aggregate_type.to_string(),
            aggregate_identifier: event.aggregate_identifier().clone(),
            sequence_number: event.sequence_number(),
            timestamp: event.timestamp(),
            payload: self.serializer.serialize(event.payload())?,
            meta_data: self.serializer.serialize_meta_data(event.meta_data())?,
        })
    }

    /// Upcasting may expand one entry into several events (or none).
    fn decode(&self, entry: EventEntry) -> Result<Vec<DomainEventMessage>, SerializationError> {
        let meta_data = self.serializer.deserialize_meta_data(&entry.meta_data)?;
        let objects = if self.upcasters.is_empty() {
            vec![entry.payload]
        } else {
            let context = UpcastingContext {
                identifier: entry.event_identifier,
                aggregate_identifier: &entry.aggregate_identifier,
                sequence_number: entry.sequence_number,
                timestamp: entry.timestamp,
                meta_data: &meta_data,
            };
            self.upcasters.upcast(entry.payload.clone(), &context)?
        };

        objects
            .iter()
            .map(|object| {
                Ok(DomainEventMessage::from_parts(
                    entry.event_identifier,
                    entry.aggregate_identifier.clone(),
                    entry.sequence_number,
                    self.serializer.deserialize(object)?,
                    meta_data.clone(),
                    entry.timestamp,
                ))
            })
            .collect()
    }
}

/// Lazily fetches one stream batch by batch.
struct BatchingEventIterator<B> {
    backend: Arc<B>,
    codec: Codec,
    aggregate_type: String,
    aggregate_identifier: AggregateId,
    next_sequence: u64,
    last_sequence: Option<u64>,
    batch_size: usize,
    buffer: VecDeque<DomainEventMessage>,
    exhausted: bool,
}

impl<B: EventEntryStore> BatchingEventIterator<B> {
    fn fetch(&mut self) -> Result<Vec<EventEntry>, EventStoreError> {
        if self.last_sequence.is_some_and(|last| self.next_sequence > last) {
            self.exhausted = true;
            return Ok(Vec::new());
        }

        let batch = self.backend.fetch_stream_batch(
            &self.aggregate_type,
            &self.aggregate_identifier,
            self.next_sequence,
            self.batch_size,
        )?;
        if batch.len() < self.batch_size {
            self.exhausted = true;
        }
        if let Some(last) = batch.last() {
            self.next_sequence = last.sequence_number + 1;
        }
        debug!(
            aggregate_type = %self.aggregate_type,
            aggregate_id = %self.aggregate_identifier,
            entry_count = batch.len(),
            "fetched event batch"
        );
        Ok(batch)
    }

    fn buffer_batch(&mut self, batch: Vec<EventEntry>) -> Result<(), EventStoreError> {
        for entry in batch {
            if self.last_sequence.is_some_and(|last| entry.sequence_number > last) {
                self.exhausted = true;
                break;
            }
            self.buffer.extend(self.codec.decode(entry)?);
        }
        Ok(())
    }
}

impl<B: EventEntryStore> Iterator for BatchingEventIterator<B> {
    type Item = Result<DomainEventMessage, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.buffer.pop_front() {
                return Some(Ok(event));
            }
            if self.exhausted {
                return None;
            }
            let loaded = self.fetch().and_then(|batch| self.buffer_batch(batch));
            if let Err(err) = loaded {
                self.exhausted = true;
                self.buffer.clear();
                return Some(Err(StreamError::new(err.to_string())));
            }
        }
    }
}

/// Implementation of all event store traits over a serializer, an upcaster
/// chain and an [`EventEntryStore`] backend.
///
/// ## Snapshots
///
/// Snapshots are domain events whose payload is the aggregate itself, so the
/// aggregate type must be registered with the serializer. A snapshot that
/// cannot be read (unknown type, malformed document) is ignored with a
/// warning and the full stream is read instead.
pub struct SerializingEventStore<B> {
    backend: Arc<B>,
    codec: Codec,
    config: EventStoreConfig,
}

impl<B: EventEntryStore + 'static> SerializingEventStore<B> {
    pub fn new(backend: B, serializer: impl Serializer + 'static) -> Self {
        Self::from_parts(Arc::new(backend), Arc::new(serializer))
    }

    pub fn from_parts(backend: Arc<B>, serializer: Arc<dyn Serializer>) -> Self {
        Self {
            backend,
            codec: Codec {
                serializer,
                upcasters: Arc::new(UpcasterChain::new()),
            },
            config: EventStoreConfig::default(),
        }
    }

    pub fn with_upcasters(mut self, upcasters: UpcasterChain) -> Self {
        self.codec.upcasters = Arc::new(upcasters);
        self
    }

    pub fn with_config(mut self, config: EventStoreConfig) -> Self {
        self.config = EventStoreConfig {
            batch_size: config.batch_size.max(1),
            ..config
        };
        self
    }

    pub fn with_batch_size(self, batch_size: usize) -> Self {
        let config = EventStoreConfig {
            batch_size,
            ..self.config
        };
        self.with_config(config)
    }

    pub fn with_max_snapshots_archived(self, max_snapshots_archived: usize) -> Self {
        let config = EventStoreConfig {
            max_snapshots_archived,
            ..self.config
        };
        self.with_config(config)
    }

    pub fn config(&self) -> &EventStoreConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    fn iterator(
        &self,
        aggregate_type: &str,
        aggregate_identifier: &AggregateId,
        first: u64,
        last: Option<u64>,
    ) -> BatchingEventIterator<B> {
        BatchingEventIterator {
            backend: self.backend.clone(),
            codec: self.codec.clone(),
            aggregate_type: aggregate_type.to_string(),
            aggregate_identifier: aggregate_identifier.clone(),
            next_sequence: first,
            last_sequence: last,
            batch_size: self.config.batch_size,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// The latest readable snapshot, if any.
    fn load_snapshot(
        &self,
        aggregate_type: &str,
        aggregate_identifier: &AggregateId,
    ) -> Result<Option<DomainEventMessage>, EventStoreError> {
        let Some(entry) = self
            .backend
            .load_last_snapshot(aggregate_type, aggregate_identifier)?
        else {
            return Ok(None);
        };
        let sequence_number = entry.sequence_number;

        match self.codec.decode(entry) {
            Ok(mut decoded) if decoded.len() == 1 => {
                let snapshot = decoded.remove(0);
                if snapshot.payload().is::<UnknownSerializedType>() {
                    warn!(
                        aggregate_type,
                        aggregate_id = %aggregate_identifier,
                        sequence_number,
                        "snapshot has an unknown type; reading full stream"
                    );
                    Ok(None)
                } else {
                    Ok(Some(snapshot))
                }
            }
            Ok(decoded) => {
                warn!(
                    aggregate_type,
                    aggregate_id = %aggregate_identifier,
                    sequence_number,
                    event_count = decoded.len(),
                    "snapshot upcast to unexpected number of events; reading full stream"
                );
                Ok(None)
            }
            Err(err) => {
                warn!(
                    aggregate_type,
                    aggregate_id = %aggregate_identifier,
                    sequence_number,
                    error = %err,
                    "failed to read snapshot; reading full stream"
                );
                Ok(None)
            }
        }
    }

    fn has_events(
        &self,
        aggregate_type: &str,
        aggregate_identifier: &AggregateId,
    ) -> Result<bool, EventStoreError> {
        Ok(!self
            .backend
            .fetch_stream_batch(aggregate_type, aggregate_identifier, 0, 1)?
            .is_empty())
    }
}

impl<B: EventEntryStore + 'static> EventStore for SerializingEventStore<B> {
    #[instrument(skip(self, events), fields(event_count = events.len()), err)]
    fn append_events(
        &self,
        aggregate_type: &str,
        events: &[DomainEventMessage],
    ) -> Result<(), EventStoreError> {
        if events.is_empty() {
            return Ok(());
        }
        let entries = events
            .iter()
            .map(|event| self.codec.encode(aggregate_type, event))
            .collect::<Result<Vec<_>, _>>()?;

        self.backend.persist_events(entries)?;
        debug!(aggregate_type, event_count = events.len(), "events appended");
        Ok(())
    }

    #[instrument(skip(self), fields(aggregate_id = %aggregate_identifier, snapshot_sequence), err)]
    fn read_events(
        &self,
        aggregate_type: &str,
        aggregate_identifier: &AggregateId,
    ) -> Result<DomainEventStream, EventStoreError> {
        let snapshot = self.load_snapshot(aggregate_type, aggregate_identifier)?;
        let first = snapshot
            .as_ref()
            .map_or(0, |s| s.sequence_number() + 1);
        if let Some(s) = &snapshot {
            Span::current().record("snapshot_sequence", s.sequence_number());
        }

        let mut events = self.iterator(aggregate_type, aggregate_identifier, first, None).peekable();
        if snapshot.is_none() && events.peek().is_none() {
            return Err(EventStoreError::stream_not_found(aggregate_type, aggregate_identifier));
        }

        Ok(DomainEventStream::new(snapshot.into_iter().map(Ok).chain(events)))
    }
}

impl<B: EventEntryStore + 'static> PartialStreamSupport for SerializingEventStore<B> {
    #[instrument(skip(self), fields(aggregate_id = %aggregate_identifier), err)]
    fn read_events_range(
        &self,
        aggregate_type: &str,
        aggregate_identifier: &AggregateId,
        first: u64,
        last: Option<u64>,
    ) -> Result<DomainEventStream, EventStoreError> {
        let mut events = self.iterator(aggregate_type, aggregate_identifier, first, last).peekable();
        if events.peek().is_none() && !self.has_events(aggregate_type, aggregate_identifier)? {
            return Err(EventStoreError::stream_not_found(aggregate_type, aggregate_identifier));
        }
        Ok(DomainEventStream::new(events))
    }
}

impl<B: EventEntryStore + 'static> SnapshotEventStore for SerializingEventStore<B> {
    #[instrument(
        skip(self, snapshot),
        fields(
            aggregate_id = %snapshot.aggregate_identifier(),
            sequence_number = snapshot.sequence_number()
        ),
        err
    )]
    fn append_snapshot_event(
        &self,
        aggregate_type: &str,
        snapshot: &DomainEventMessage,
    ) -> Result<(), EventStoreError> {
        let entry = self.codec.encode(aggregate_type, snapshot)?;
        self.backend.persist_snapshot(entry)?;

        match self.backend.prune_snapshots(
            aggregate_type,
            snapshot.aggregate_identifier(),
            self.config.max_snapshots_archived,
        ) {
            Ok(pruned) if pruned > 0 => debug!(aggregate_type, pruned, "pruned snapshots"),
            Ok(_) => {}
            Err(err) => warn!(
                aggregate_type,
                aggregate_id = %snapshot.aggregate_identifier(),
                error = %err,
                "failed to prune snapshots"
            ),
        }
        Ok(())
    }
}

impl<B: EventEntryStore + 'static> EventStoreManagement for SerializingEventStore<B> {
    #[instrument(skip(self, visitor), fields(event_count), err)]
    fn visit_events(
        &self,
        criteria: &EventCriteria,
        visitor: &mut dyn FnMut(&DomainEventMessage),
    ) -> Result<(), EventStoreError> {
        let mut after = None;
        let mut visited = 0usize;
        loop {
            let batch = self.backend.fetch_filtered_batch(
                criteria,
                after.as_ref(),
                self.config.batch_size,
            )?;
            let complete = batch.len() < self.config.batch_size;
            after = batch.last().map(EventEntry::position);

            for entry in batch {
                for event in self.codec.decode(entry)? {
                    visitor(&event);
                    visited += 1;
                }
            }
            if complete || after.is_none() {
                break;
            }
        }
        Span::current().record("event_count", visited);
        Ok(())
    }

    #[instrument(skip(self), err)]
    fn read_tracked(
        &self,
        after: Option<GlobalIndexToken>,
        limit: usize,
    ) -> Result<Vec<TrackedDomainEvent>, EventStoreError> {
        let mut tracked = Vec::new();
        for record in self.backend.fetch_tracked(after, limit)? {
            let aggregate_type = record.entry.aggregate_type.clone();
            for event in self.codec.decode(record.entry)? {
                tracked.push(TrackedDomainEvent {
                    token: record.token,
                    aggregate_type: aggregate_type.clone(),
                    event,
                });
            }
        }
        Ok(tracked)
    }
}

impl<B> std::fmt::Debug for SerializingEventStore<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerializingEventStore")
            .field("config", &self.config)
            .field("upcasters", &self.codec.upcasters)
            .finish_non_exhaustive()
    }
}
