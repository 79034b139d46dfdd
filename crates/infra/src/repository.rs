//! Loading and saving event-sourced aggregates.
//!
//! ## Load
//!
//! ```text
//! read_events (latest snapshot + later events)
//!   ↓
//! decorate_for_read (first registered decorator first)
//!   ↓
//! initialize_state (replay into a fresh aggregate)
//!   ↓
//! deleted? version matches?
//! ```
//!
//! ## Save
//!
//! ```text
//! uncommitted events
//!   ↓
//! decorate_for_append (first registered decorator last)
//!   ↓
//! append_events (atomic; duplicates are concurrency failures)
//!   ↓
//! commit, snapshot trigger, publish to the event bus
//! ```
//!
//! Events are published only after the append succeeded. A failed append
//! leaves the guard's uncommitted events in place so the caller can retry or
//! discard the guard.

use std::sync::Arc;

use keel_core::{
    AggregateConfiguration, AggregateId, AggregateRegistry, DomainError, DomainEventMessage,
    EventRef, EventSourcedAggregate, EventSourcedAggregateGuard, ExpectedVersion,
};
use keel_events::{EventBus, EventBusError};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::decorator::EventStreamDecorator;
use crate::event_store::{EventStoreError, SnapshotEventStore};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("aggregate {aggregate_identifier} not found")]
    AggregateNotFound { aggregate_identifier: AggregateId },

    #[error("aggregate {aggregate_identifier} has been deleted")]
    AggregateDeleted { aggregate_identifier: AggregateId },

    #[error(
        "aggregate {aggregate_identifier} is at version {actual:?}, expected {expected:?}"
    )]
    ConflictingVersion {
        aggregate_identifier: AggregateId,
        expected: ExpectedVersion,
        actual: Option<u64>,
    },

    #[error("cannot save aggregate without identifier")]
    MissingIdentifier,

    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Publication failed after a successful append (at-least-once; retry may duplicate).
    #[error("event publication failed: {0}")]
    Publish(#[from] EventBusError),
}

/// When the repository stores a snapshot after saving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotTrigger {
    #[default]
    Never,
    /// Once at least this many events were replayed or appended since the
    /// last snapshot.
    EventCount(usize),
}

impl SnapshotTrigger {
    fn should_snapshot(self, events_since_snapshot: usize) -> bool {
        match self {
            SnapshotTrigger::Never => false,
            SnapshotTrigger::EventCount(threshold) => events_since_snapshot >= threshold.max(1),
        }
    }
}

type AggregateFactory<A> = Box<dyn Fn() -> A + Send + Sync>;

/// Repository of event-sourced aggregates of type `A` stored in `S`.
pub struct EventSourcingRepository<A, S> {
    store: S,
    configuration: Arc<AggregateConfiguration<A>>,
    factory: AggregateFactory<A>,
    decorators: Vec<Arc<dyn EventStreamDecorator>>,
    snapshot_trigger: SnapshotTrigger,
    event_bus: Option<Arc<dyn EventBus>>,
}

impl<A, S> EventSourcingRepository<A, S>
where
    A: EventSourcedAggregate + Clone,
    S: SnapshotEventStore,
{
    /// A repository creating fresh aggregates with `A::default()`.
    pub fn new(store: S, registry: &AggregateRegistry) -> Result<Self, RepositoryError>
    where
        A: Default,
    {
        Self::with_factory(store, registry, A::default)
    }

    pub fn with_factory(
        store: S,
        registry: &AggregateRegistry,
        factory: impl Fn() -> A + Send + Sync + 'static,
    ) -> Result<Self, RepositoryError> {
        Ok(Self {
            store,
            configuration: registry.configuration::<A>()?,
            factory: Box::new(factory),
            decorators: Vec::new(),
            snapshot_trigger: SnapshotTrigger::Never,
            event_bus: None,
        })
    }

    pub fn with_decorator(mut self, decorator: impl EventStreamDecorator + 'static) -> Self {
        self.decorators.push(Arc::new(decorator));
        self
    }

    pub fn with_snapshot_trigger(mut self, trigger: SnapshotTrigger) -> Self {
        self.snapshot_trigger = trigger;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn type_identifier(&self) -> &str {
        self.configuration.type_identifier()
    }

    /// A guard over a fresh aggregate, without history.
    pub fn new_aggregate(&self) -> EventSourcedAggregateGuard<A> {
        EventSourcedAggregateGuard::new((self.factory)(), self.configuration.clone())
    }

    #[instrument(
        skip(self),
        fields(aggregate_type = %self.type_identifier(), aggregate_id = %aggregate_identifier),
        err
    )]
    pub fn load(
        &self,
        aggregate_identifier: &AggregateId,
        expected_version: ExpectedVersion,
    ) -> Result<EventSourcedAggregateGuard<A>, RepositoryError> {
        let aggregate_type = self.type_identifier();
        let stream = match self.store.read_events(aggregate_type, aggregate_identifier) {
            Ok(stream) => stream,
            Err(EventStoreError::StreamNotFound { .. }) => {
                return Err(RepositoryError::AggregateNotFound {
                    aggregate_identifier: aggregate_identifier.clone(),
                });
            }
            Err(err) => return Err(err.into()),
        };
        let stream = self
            .decorators
            .iter()
            .fold(stream, |s, d| d.decorate_for_read(aggregate_type, aggregate_identifier, s));

        let mut guard = self.new_aggregate();
        guard.initialize_state(stream)?;

        if guard.is_deleted() {
            return Err(RepositoryError::AggregateDeleted {
                aggregate_identifier: aggregate_identifier.clone(),
            });
        }
        if !expected_version.matches(guard.version()) {
            return Err(RepositoryError::ConflictingVersion {
                aggregate_identifier: aggregate_identifier.clone(),
                expected: expected_version,
                actual: guard.version(),
            });
        }

        debug!(version = ?guard.version(), "aggregate loaded");
        Ok(guard)
    }

    /// Persist the guard's uncommitted events and return them as committed.
    #[instrument(
        skip(self, guard),
        fields(
            aggregate_type = %self.type_identifier(),
            event_count = guard.uncommitted_event_count()
        ),
        err
    )]
    pub fn save(
        &self,
        guard: &mut EventSourcedAggregateGuard<A>,
    ) -> Result<Vec<DomainEventMessage>, RepositoryError> {
        if guard.uncommitted_event_count() == 0 {
            return Ok(Vec::new());
        }
        let aggregate_identifier = guard.identifier().ok_or(RepositoryError::MissingIdentifier)?;
        let aggregate_type = self.type_identifier();

        let events = self
            .decorators
            .iter()
            .rev()
            .fold(guard.uncommitted_events().to_vec(), |events, d| {
                d.decorate_for_append(aggregate_type, &aggregate_identifier, events)
            });
        self.store.append_events(aggregate_type, &events)?;
        guard.commit_events();

        info!(
            aggregate_id = %aggregate_identifier,
            version = ?guard.version(),
            "aggregate saved"
        );

        if self.snapshot_trigger.should_snapshot(guard.events_since_snapshot()) {
            self.snapshot(guard);
        }

        if let Some(bus) = &self.event_bus {
            let published: Vec<EventRef> = events.iter().cloned().map(DomainEventMessage::into_ref).collect();
            bus.publish(&published)?;
        }
        Ok(events)
    }

    /// Best effort: the events are already stored, so a failed snapshot is
    /// only logged.
    fn snapshot(&self, guard: &mut EventSourcedAggregateGuard<A>) {
        let Some(snapshot) = guard.create_snapshot() else {
            return;
        };
        match self.store.append_snapshot_event(self.type_identifier(), &snapshot) {
            Ok(()) => {
                debug!(sequence_number = snapshot.sequence_number(), "snapshot stored");
                guard.reset_snapshot_counter();
            }
            Err(err) => warn!(
                aggregate_id = %snapshot.aggregate_identifier(),
                error = %err,
                "failed to store snapshot"
            ),
        }
    }
}

impl<A, S> std::fmt::Debug for EventSourcingRepository<A, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSourcingRepository")
            .field("configuration", &self.configuration)
            .field("decorators", &self.decorators.len())
            .field("snapshot_trigger", &self.snapshot_trigger)
            .field("event_bus", &self.event_bus.is_some())
            .finish_non_exhaustive()
    }
}
