//! Command execution pipeline (application-level orchestration).
//!
//! This module implements the **command dispatch pattern** for event-sourced aggregates.
//! It orchestrates the full lifecycle: loading history, rehydrating state, handling commands,
//! persisting events, and publishing to the event bus.
//!
//! ## Command Execution Flow
//!
//! The `CommandDispatcher` implements this pipeline:
//!
//! ```text
//! Command
//!   ↓
//! 1. Load the aggregate through the repository (snapshot + later events)
//!      or start a fresh one when it has no history
//!   ↓
//! 2. Check the command's expected version
//!   ↓
//! 3. Handle command (decision logic applies events to the guard)
//!   ↓
//! 4. Save: append events (duplicate positions are concurrency failures)
//!   ↓
//! 5. Publish events to bus (only after the append succeeded)
//! ```
//!
//! This module contains no IO itself; it composes the repository, which in
//! turn composes the store and the bus.

use keel_core::{
    DomainError, DomainEventMessage, DomainResult, EventSourcedAggregate,
    EventSourcedAggregateGuard, ExpectedVersion,
};
use keel_events::Command;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::event_store::{EventStoreError, SnapshotEventStore};
use crate::repository::{EventSourcingRepository, RepositoryError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Optimistic concurrency failure (stale expected version or a concurrent append).
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    /// Domain validation failure (deterministic).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Domain invariant failure (deterministic).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// The command targets an aggregate that does not exist (and was not created).
    #[error("aggregate not found")]
    NotFound,

    #[error("aggregate has been deleted")]
    Deleted,

    /// The aggregate type cannot be used by the framework.
    #[error("incompatible aggregate: {0}")]
    Incompatible(String),

    /// Reading or persisting to the event store failed.
    #[error(transparent)]
    Store(EventStoreError),

    /// Publication failed after a successful append (at-least-once; retry may duplicate).
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            EventStoreError::StreamNotFound { .. } => DispatchError::NotFound,
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Concurrency(msg),
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
            DomainError::IncompatibleAggregate(msg) | DomainError::Inaccessible(msg) => {
                DispatchError::Incompatible(msg)
            }
            DomainError::Stream(err) => DispatchError::Store(EventStoreError::Stream(err)),
        }
    }
}

impl From<RepositoryError> for DispatchError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::AggregateNotFound { .. } => DispatchError::NotFound,
            RepositoryError::AggregateDeleted { .. } => DispatchError::Deleted,
            err @ RepositoryError::ConflictingVersion { .. } => {
                DispatchError::Concurrency(err.to_string())
            }
            RepositoryError::MissingIdentifier => {
                DispatchError::Incompatible("command produced no aggregate identifier".to_string())
            }
            RepositoryError::Store(err) => err.into(),
            RepositoryError::Domain(err) => err.into(),
            RepositoryError::Publish(err) => DispatchError::Publish(err.to_string()),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// ## Aggregate Lifecycle
///
/// A command whose target has no history runs against a fresh aggregate,
/// unless it expects an exact version (then it fails with `NotFound`). The
/// handler must then apply an event that assigns the command's target
/// identifier.
///
/// ## At-Least-Once Delivery
///
/// If event publication fails after a successful append, the error is returned to the caller.
/// The events are already persisted; retrying the command produces new events
/// rather than republishing the old ones.
pub struct CommandDispatcher<A, S> {
    repository: EventSourcingRepository<A, S>,
}

impl<A, S> CommandDispatcher<A, S> {
    pub fn new(repository: EventSourcingRepository<A, S>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &EventSourcingRepository<A, S> {
        &self.repository
    }

    pub fn into_repository(self) -> EventSourcingRepository<A, S> {
        self.repository
    }
}

impl<A, S> CommandDispatcher<A, S>
where
    A: EventSourcedAggregate + Clone,
    S: SnapshotEventStore,
{
    /// Dispatch a command through the full event-sourcing pipeline.
    ///
    /// `handle` is the decision logic: it inspects the aggregate through the
    /// guard and applies events to it. Returning an error discards every
    /// event it applied.
    ///
    /// Returns the committed events, empty when the handler decided nothing.
    #[instrument(skip(self, command, handle), fields(aggregate_id = %command.target_aggregate_id()), err)]
    pub fn dispatch<C, F>(&self, command: &C, handle: F) -> Result<Vec<DomainEventMessage>, DispatchError>
    where
        C: Command,
        F: FnOnce(&C, &mut EventSourcedAggregateGuard<A>) -> DomainResult<()>,
    {
        let target = command.target_aggregate_id();
        let expected = command.expected_version();

        let mut guard = match self.repository.load(&target, expected) {
            Ok(guard) => guard,
            Err(RepositoryError::AggregateNotFound { .. }) if expected == ExpectedVersion::Any => {
                debug!("no history, creating aggregate");
                self.repository.new_aggregate()
            }
            Err(err) => return Err(err.into()),
        };

        handle(command, &mut guard)?;

        match guard.identifier() {
            Some(id) if id == target => {}
            Some(id) => {
                return Err(DispatchError::Validation(format!(
                    "command for {target} produced events for {id}"
                )));
            }
            None if guard.uncommitted_event_count() == 0 => return Ok(Vec::new()),
            None => return Err(RepositoryError::MissingIdentifier.into()),
        }

        Ok(self.repository.save(&mut guard)?)
    }
}

impl<A, S> std::fmt::Debug for CommandDispatcher<A, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("repository", &self.repository)
            .finish()
    }
}
