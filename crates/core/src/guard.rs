//! The event-sourced aggregate guard.
//!
//! A guard owns one aggregate instance for the duration of a unit of work. It
//! applies new events (dispatching them to the aggregate's handlers and queueing
//! them for persistence) and rebuilds state from a persisted stream.

use std::any::Any;
use std::sync::Arc;

use tracing::debug;

use crate::aggregate::{AggregateConfiguration, EventSourcedAggregate};
use crate::error::{DomainError, DomainResult};
use crate::id::AggregateId;
use crate::message::{DomainEventMessage, DomainEventStream, EventMessage};
use crate::metadata::MetaData;
use crate::payload::Payload;

/// Whether an aggregate's identifier has been assigned yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Unassigned,
    Assigned(AggregateId),
}

impl Identity {
    pub fn is_assigned(&self) -> bool {
        matches!(self, Identity::Assigned(_))
    }
}

impl From<Option<AggregateId>> for Identity {
    fn from(value: Option<AggregateId>) -> Self {
        value.map_or(Identity::Unassigned, Identity::Assigned)
    }
}

/// Wraps an aggregate root, tracking its uncommitted events and committed
/// version.
///
/// Notes:
/// - `version` is the sequence number of the last committed (persisted or
///   replayed) event, `None` for an aggregate without history.
/// - Uncommitted events are numbered consecutively after the version (or after
///   the last uncommitted event).
/// - The guard does not validate ordering of replayed streams; a stream with
///   gaps produces undefined state.
#[derive(Debug)]
pub struct EventSourcedAggregateGuard<A> {
    aggregate: A,
    configuration: Arc<AggregateConfiguration<A>>,
    uncommitted: Vec<DomainEventMessage>,
    version: Option<u64>,
    events_since_snapshot: usize,
    deleted: bool,
}

impl<A: EventSourcedAggregate> EventSourcedAggregateGuard<A> {
    pub fn new(aggregate: A, configuration: Arc<AggregateConfiguration<A>>) -> Self {
        Self {
            aggregate,
            configuration,
            uncommitted: Vec::new(),
            version: None,
            events_since_snapshot: 0,
            deleted: false,
        }
    }

    pub fn aggregate_root(&self) -> &A {
        &self.aggregate
    }

    pub fn into_aggregate_root(self) -> A {
        self.aggregate
    }

    pub fn configuration(&self) -> &Arc<AggregateConfiguration<A>> {
        &self.configuration
    }

    pub fn type_identifier(&self) -> &str {
        self.configuration.type_identifier()
    }

    pub fn identity(&self) -> Identity {
        self.configuration.identifier(&self.aggregate).into()
    }

    pub fn identifier(&self) -> Option<AggregateId> {
        self.configuration.identifier(&self.aggregate)
    }

    pub fn version(&self) -> Option<u64> {
        self.version
    }

    /// Sequence number of the most recent event, committed or not.
    pub fn last_sequence_number(&self) -> Option<u64> {
        self.uncommitted
            .last()
            .map(DomainEventMessage::sequence_number)
            .or(self.version)
    }

    pub fn uncommitted_events(&self) -> &[DomainEventMessage] {
        &self.uncommitted
    }

    pub fn uncommitted_event_count(&self) -> usize {
        self.uncommitted.len()
    }

    pub fn mark_deleted(&mut self) {
        self.deleted = true;
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted || self.aggregate.is_deleted()
    }

    /// Committed events (replayed or appended) since the last snapshot, or
    /// since the start of the stream.
    pub fn events_since_snapshot(&self) -> usize {
        self.events_since_snapshot
    }

    pub fn reset_snapshot_counter(&mut self) {
        self.events_since_snapshot = 0;
    }

    pub fn apply<E: Any + Send + Sync>(&mut self, payload: E) -> DomainResult<()> {
        self.apply_with_meta_data(payload, MetaData::empty())
    }

    /// Apply an event: dispatch it to the aggregate's handlers and queue it
    /// for persistence.
    ///
    /// For an aggregate whose identifier is not assigned yet the event is
    /// handled first (it is expected to assign the identifier) and queued
    /// afterwards. Otherwise it is queued first so handlers observe its final
    /// sequence number.
    pub fn apply_with_meta_data<E: Any + Send + Sync>(
        &mut self,
        payload: E,
        meta_data: MetaData,
    ) -> DomainResult<()> {
        let payload = Payload::new(payload);
        match self.identity() {
            Identity::Assigned(id) => {
                let sequence_number = self.next_sequence_number();
                let message = DomainEventMessage::new(id, sequence_number, payload, meta_data);
                self.configuration.handle(&mut self.aggregate, &message);
                self.uncommitted.push(message);
                Ok(())
            }
            Identity::Unassigned => self.apply_creation_event(payload, meta_data),
        }
    }

    fn apply_creation_event(&mut self, payload: Payload, meta_data: MetaData) -> DomainResult<()> {
        if !self.uncommitted.is_empty() || self.version.is_some() {
            return Err(DomainError::incompatible(format!(
                "aggregate {} has events but no identifier; the first event must assign it",
                self.type_identifier()
            )));
        }

        let provisional =
            DomainEventMessage::new(AggregateId::new(""), 0, payload.clone(), meta_data.clone());
        self.configuration.handle(&mut self.aggregate, &provisional);

        let Identity::Assigned(id) = self.identity() else {
            return Err(DomainError::incompatible(format!(
                "aggregate {} identifier still unassigned after handling {}",
                self.type_identifier(),
                payload.payload_type().simple_name()
            )));
        };

        self.uncommitted.push(DomainEventMessage::from_parts(
            provisional.identifier(),
            id,
            0,
            payload,
            meta_data,
            provisional.timestamp(),
        ));
        Ok(())
    }

    fn next_sequence_number(&self) -> u64 {
        self.last_sequence_number().map_or(0, |seq| seq + 1)
    }

    /// Hand out the queued events exactly once and advance the version.
    pub fn commit_events(&mut self) -> Vec<DomainEventMessage> {
        let committed = std::mem::take(&mut self.uncommitted);
        if let Some(last) = committed.last() {
            self.version = Some(last.sequence_number());
        }
        self.events_since_snapshot += committed.len();
        committed
    }
}

impl<A: EventSourcedAggregate + Clone> EventSourcedAggregateGuard<A> {
    /// Rebuild state from a persisted stream.
    ///
    /// Snapshot events (payload of type `A`) replace the whole aggregate; every
    /// other event goes through the handlers. The stream is consumed fully.
    pub fn initialize_state(&mut self, stream: DomainEventStream) -> DomainResult<()> {
        if !self.uncommitted.is_empty() {
            return Err(DomainError::incompatible(format!(
                "cannot replay history into aggregate {} holding {} uncommitted events",
                self.type_identifier(),
                self.uncommitted.len()
            )));
        }

        let mut replayed = 0usize;
        for item in stream {
            let message = item?;
            match message.payload().downcast_arc::<A>() {
                Some(snapshot) => {
                    self.aggregate =
                        Arc::try_unwrap(snapshot).unwrap_or_else(|shared| (*shared).clone());
                    self.events_since_snapshot = 0;
                }
                None => {
                    self.configuration.handle(&mut self.aggregate, &message);
                    self.events_since_snapshot += 1;
                }
            }
            self.version = Some(message.sequence_number());
            replayed += 1;
        }

        debug!(
            aggregate_type = self.type_identifier(),
            event_count = replayed,
            version = ?self.version,
            "aggregate state initialized"
        );
        Ok(())
    }

    /// A snapshot of the committed state, or `None` for an aggregate without
    /// committed events or identifier.
    ///
    /// Uncommitted events are not reflected in the snapshot's sequence number,
    /// so snapshots should be taken after [`commit_events`](Self::commit_events).
    pub fn create_snapshot(&self) -> Option<DomainEventMessage> {
        let version = self.version?;
        let id = self.identifier()?;
        Some(DomainEventMessage::new(
            id,
            version,
            Payload::new(self.aggregate.clone()),
            MetaData::empty(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{AggregateModel, AggregateRegistry};
    use crate::entity::EntityModel;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Account {
        id: Option<AggregateId>,
        balance: i64,
        seen_sequence: Vec<u64>,
        cards: BTreeMap<String, Card>,
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Card {
        limit: i64,
    }

    #[derive(Debug, Clone)]
    struct Opened(String);
    #[derive(Debug, Clone)]
    struct Deposited(i64);
    #[derive(Debug, Clone)]
    struct CardIssued(String);
    #[derive(Debug, Clone)]
    struct LimitRaised(i64);

    impl EventSourcedAggregate for Account {
        fn describe(model: &mut AggregateModel<Self>) {
            let mut cards = EntityModel::new();
            cards.on(|card: &mut Card, e: &LimitRaised| card.limit += e.0);

            model
                .identifier(|a: &Account| a.id.clone())
                .on(|a: &mut Account, e: &Opened| a.id = Some(AggregateId::new(e.0.clone())))
                .on_message(|a: &mut Account, e: &Deposited, msg| {
                    a.balance += e.0;
                    a.seen_sequence.push(msg.sequence_number());
                })
                .on(|a: &mut Account, e: &CardIssued| {
                    a.cards.insert(e.0.clone(), Card::default());
                })
                .entities(|a: &mut Account| a.cards.values_mut().collect(), cards);
        }
    }

    #[derive(Debug, Clone, Default)]
    struct NeverIdentified {
        hits: u32,
    }

    impl EventSourcedAggregate for NeverIdentified {
        fn describe(model: &mut AggregateModel<Self>) {
            model
                .identifier(|_: &NeverIdentified| None)
                .on(|n: &mut NeverIdentified, _: &Deposited| n.hits += 1);
        }
    }

    fn guard() -> EventSourcedAggregateGuard<Account> {
        let registry = AggregateRegistry::new();
        EventSourcedAggregateGuard::new(Account::default(), registry.configuration().unwrap())
    }

    #[test]
    fn first_event_assigns_identity_and_keeps_provisional_identity() {
        let mut g = guard();
        assert_eq!(g.identity(), Identity::Unassigned);

        g.apply(Opened("acc-1".into())).unwrap();

        assert_eq!(g.identity(), Identity::Assigned(AggregateId::new("acc-1")));
        let events = g.uncommitted_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].aggregate_identifier().as_str(), "acc-1");
        assert_eq!(events[0].sequence_number(), 0);
    }

    #[test]
    fn subsequent_events_are_sequenced_before_dispatch() {
        let mut g = guard();
        g.apply(Opened("acc-1".into())).unwrap();
        g.apply(Deposited(10)).unwrap();
        g.apply_with_meta_data(Deposited(5), MetaData::with("user", "bob"))
            .unwrap();

        assert_eq!(g.aggregate_root().balance, 15);
        assert_eq!(g.aggregate_root().seen_sequence, vec![1, 2]);
        assert_eq!(g.uncommitted_events()[2].meta_data().get("user").unwrap(), "bob");
        assert_eq!(g.version(), None);
    }

    #[test]
    fn identity_never_assigned_is_an_incompatible_aggregate() {
        let registry = AggregateRegistry::new();
        let mut g = EventSourcedAggregateGuard::new(
            NeverIdentified::default(),
            registry.configuration().unwrap(),
        );

        let err = g.apply(Deposited(1)).unwrap_err();
        assert!(matches!(err, DomainError::IncompatibleAggregate(_)));
        assert_eq!(g.uncommitted_event_count(), 0);
        // the provisional dispatch already reached the handler
        assert_eq!(g.aggregate_root().hits, 1);
    }

    #[test]
    fn commit_hands_out_events_once_and_advances_version() {
        let mut g = guard();
        g.apply(Opened("acc-1".into())).unwrap();
        g.apply(Deposited(1)).unwrap();

        let committed = g.commit_events();
        assert_eq!(committed.len(), 2);
        assert_eq!(g.version(), Some(1));
        assert!(g.commit_events().is_empty());
        assert_eq!(g.version(), Some(1));

        g.apply(Deposited(1)).unwrap();
        assert_eq!(g.uncommitted_events()[0].sequence_number(), 2);
    }

    #[test]
    fn child_entities_receive_events() {
        let mut g = guard();
        g.apply(Opened("acc-1".into())).unwrap();
        g.apply(CardIssued("visa".into())).unwrap();
        g.apply(CardIssued("amex".into())).unwrap();
        g.apply(LimitRaised(100)).unwrap();

        let cards = &g.aggregate_root().cards;
        assert_eq!(cards["visa"].limit, 100);
        assert_eq!(cards["amex"].limit, 100);
    }

    #[test]
    fn initialize_state_replays_and_restores_snapshots() {
        let mut source = guard();
        source.apply(Opened("acc-1".into())).unwrap();
        source.apply(Deposited(7)).unwrap();
        source.commit_events();
        let snapshot = source.create_snapshot().unwrap();
        assert_eq!(snapshot.sequence_number(), 1);

        let later = DomainEventMessage::new("acc-1", 2, Payload::new(Deposited(3)), MetaData::empty());
        let mut replay = guard();
        replay
            .initialize_state(DomainEventStream::from_events(vec![snapshot, later]))
            .unwrap();

        assert_eq!(replay.aggregate_root().balance, 10);
        assert_eq!(replay.version(), Some(2));
        assert_eq!(replay.events_since_snapshot(), 1);
        assert_eq!(replay.uncommitted_event_count(), 0);
        assert_eq!(replay.identifier(), Some(AggregateId::new("acc-1")));
    }

    #[test]
    fn initialize_state_refuses_guard_with_uncommitted_events() {
        let mut g = guard();
        g.apply(Opened("acc-1".into())).unwrap();

        let err = g.initialize_state(DomainEventStream::empty()).unwrap_err();
        assert!(matches!(err, DomainError::IncompatibleAggregate(_)));
    }

    #[test]
    fn stream_failures_abort_replay() {
        let mut g = guard();
        let items = vec![Err(crate::error::StreamError::new("batch lost"))];

        let err = g
            .initialize_state(DomainEventStream::new(items.into_iter()))
            .unwrap_err();
        assert!(matches!(err, DomainError::Stream(_)));
    }

    #[test]
    fn snapshot_requires_committed_history() {
        let mut g = guard();
        assert!(g.create_snapshot().is_none());
        g.apply(Opened("acc-1".into())).unwrap();
        assert!(g.create_snapshot().is_none());
    }

    proptest! {
        #[test]
        fn replaying_committed_events_rebuilds_the_same_state(
            deposits in proptest::collection::vec(-1_000i64..1_000, 0..40)
        ) {
            let mut live = guard();
            live.apply(Opened("acc-p".into())).unwrap();
            for amount in &deposits {
                live.apply(Deposited(*amount)).unwrap();
            }
            let events = live.commit_events();

            let mut replayed = guard();
            replayed.initialize_state(DomainEventStream::from_events(events)).unwrap();

            prop_assert_eq!(replayed.aggregate_root(), live.aggregate_root());
            prop_assert_eq!(replayed.version(), live.version());
        }
    }
}
