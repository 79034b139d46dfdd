//! Event messages and domain event streams.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::StreamError;
use crate::id::{AggregateId, EventId};
use crate::metadata::MetaData;
use crate::payload::Payload;

/// A message describing something that happened.
///
/// Listeners, monitors and parameter resolvers work against this trait so they
/// can handle both plain event messages and domain event messages.
pub trait EventMessage: fmt::Debug + Send + Sync {
    /// Globally unique identifier of this message.
    fn identifier(&self) -> EventId;

    fn payload(&self) -> &Payload;

    fn meta_data(&self) -> &MetaData;

    fn timestamp(&self) -> DateTime<Utc>;

    /// The domain view of this message, if it was produced by an aggregate.
    fn as_domain_event(&self) -> Option<&DomainEventMessage> {
        None
    }
}

/// Shared handle on an event message, as passed between clusters, listeners
/// and monitors (possibly across threads).
pub type EventRef = Arc<dyn EventMessage>;

/// An event message that is not bound to an aggregate stream.
#[derive(Debug, Clone)]
pub struct GenericEventMessage {
    identifier: EventId,
    payload: Payload,
    meta_data: MetaData,
    timestamp: DateTime<Utc>,
}

impl GenericEventMessage {
    pub fn new(payload: Payload) -> Self {
        Self::with_meta_data(payload, MetaData::empty())
    }

    pub fn with_meta_data(payload: Payload, meta_data: MetaData) -> Self {
        Self {
            identifier: EventId::new(),
            payload,
            meta_data,
            timestamp: Utc::now(),
        }
    }

    pub fn from_parts(
        identifier: EventId,
        payload: Payload,
        meta_data: MetaData,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            identifier,
            payload,
            meta_data,
            timestamp,
        }
    }

    pub fn into_ref(self) -> EventRef {
        Arc::new(self)
    }
}

impl EventMessage for GenericEventMessage {
    fn identifier(&self) -> EventId {
        self.identifier
    }

    fn payload(&self) -> &Payload {
        &self.payload
    }

    fn meta_data(&self) -> &MetaData {
        &self.meta_data
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Immutable record of an event in an aggregate's stream.
///
/// Notes:
/// - `sequence_number` starts at 0 and increases by one per event of the same
///   aggregate; a stream has no gaps and no duplicates.
/// - `identifier` is globally unique across all streams.
#[derive(Debug, Clone)]
pub struct DomainEventMessage {
    identifier: EventId,
    aggregate_identifier: AggregateId,
    sequence_number: u64,
    payload: Payload,
    meta_data: MetaData,
    timestamp: DateTime<Utc>,
}

impl DomainEventMessage {
    /// Create a new domain event with a fresh identifier and the current time.
    pub fn new(
        aggregate_identifier: impl Into<AggregateId>,
        sequence_number: u64,
        payload: Payload,
        meta_data: MetaData,
    ) -> Self {
        Self {
            identifier: EventId::new(),
            aggregate_identifier: aggregate_identifier.into(),
            sequence_number,
            payload,
            meta_data,
            timestamp: Utc::now(),
        }
    }

    /// Rebuild a domain event from stored parts.
    pub fn from_parts(
        identifier: EventId,
        aggregate_identifier: AggregateId,
        sequence_number: u64,
        payload: Payload,
        meta_data: MetaData,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            identifier,
            aggregate_identifier,
            sequence_number,
            payload,
            meta_data,
            timestamp,
        }
    }

    pub fn aggregate_identifier(&self) -> &AggregateId {
        &self.aggregate_identifier
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// A copy of this message with a different payload (same identity, position
    /// and metadata).
    pub fn with_payload(&self, payload: Payload) -> Self {
        Self {
            payload,
            ..self.clone()
        }
    }

    /// A copy of this message with its metadata replaced.
    pub fn with_meta_data(&self, meta_data: MetaData) -> Self {
        Self {
            meta_data,
            ..self.clone()
        }
    }

    /// A copy of this message with extra metadata merged in.
    pub fn and_meta_data(&self, meta_data: &MetaData) -> Self {
        Self {
            meta_data: self.meta_data.merged_with(meta_data),
            ..self.clone()
        }
    }

    pub fn into_ref(self) -> EventRef {
        Arc::new(self)
    }
}

impl EventMessage for DomainEventMessage {
    fn identifier(&self) -> EventId {
        self.identifier
    }

    fn payload(&self) -> &Payload {
        &self.payload
    }

    fn meta_data(&self) -> &MetaData {
        &self.meta_data
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn as_domain_event(&self) -> Option<&DomainEventMessage> {
        Some(self)
    }
}

type StreamItem = Result<DomainEventMessage, StreamError>;

/// A lazily evaluated, read-once stream of domain events.
///
/// Items are produced on demand (e.g. batch by batch from storage). A stream can
/// be peeked without consuming the head, and decorated by wrapping its iterator.
pub struct DomainEventStream {
    source: Box<dyn Iterator<Item = StreamItem> + Send>,
    peeked: Option<StreamItem>,
}

impl DomainEventStream {
    pub fn new(source: impl Iterator<Item = StreamItem> + Send + 'static) -> Self {
        Self {
            source: Box::new(source),
            peeked: None,
        }
    }

    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    /// A stream over already materialized events.
    pub fn from_events(events: impl IntoIterator<Item = DomainEventMessage>) -> Self {
        let buffered: Vec<DomainEventMessage> = events.into_iter().collect();
        Self::new(buffered.into_iter().map(Ok))
    }

    /// Whether another item is available.
    pub fn has_next(&mut self) -> bool {
        self.peek().is_some()
    }

    /// Look at the next item without consuming it.
    pub fn peek(&mut self) -> Option<&StreamItem> {
        if self.peeked.is_none() {
            self.peeked = self.source.next();
        }
        self.peeked.as_ref()
    }

    /// Transform every successfully read event; errors are passed through.
    pub fn map_events<F>(self, mut f: F) -> Self
    where
        F: FnMut(DomainEventMessage) -> DomainEventMessage + Send + 'static,
    {
        Self::new(self.map(move |item| item.map(&mut f)))
    }

    /// Keep only the events for which `predicate` returns true.
    pub fn filter_events<F>(self, mut predicate: F) -> Self
    where
        F: FnMut(&DomainEventMessage) -> bool + Send + 'static,
    {
        Self::new(self.filter(move |item| match item {
            Ok(event) => predicate(event),
            Err(_) => true,
        }))
    }

    /// Drain the stream, failing on the first stream error.
    pub fn collect_events(self) -> Result<Vec<DomainEventMessage>, StreamError> {
        self.collect()
    }
}

impl Iterator for DomainEventStream {
    type Item = StreamItem;

    fn next(&mut self) -> Option<Self::Item> {
        match self.peeked.take() {
            Some(item) => Some(item),
            None => self.source.next(),
        }
    }
}

impl fmt::Debug for DomainEventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainEventStream")
            .field("peeked", &self.peeked.is_some())
            .finish_non_exhaustive()
    }
}
