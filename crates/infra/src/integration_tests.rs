//! Integration tests for the full event-sourced pipeline.
//!
//! Tests: Command → Repository → EventStore → EventBus → Listener
//!
//! Verifies:
//! - Snapshots and batched reads rebuild the same state as full replays
//! - Concurrent appends to the same stream position are detected
//! - Unknown and obsolete stored types are handled without failing reads
//! - Events are published only after they were stored

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::{Duration, Utc};
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use keel_core::{
        AggregateId, AggregateModel, AggregateRegistry, DomainError, DomainEventMessage,
        DomainEventStream, DomainResult, EventId, EventMessage, EventRef, EventSourcedAggregate,
        EventSourcedAggregateGuard, ExpectedVersion, MetaData, Payload,
    };
    use keel_events::parameter::{ParameterDescriptor, default_factories};
    use keel_events::{
        AnnotatedEventListener, ClusteringEventBus, Command, EventBus, FnEventListener,
        MemberDescriptor,
    };

    use crate::command_dispatcher::{CommandDispatcher, DispatchError};
    use crate::decorator::EventStreamDecorator;
    use crate::event_store::{
        EventCriteria, EventStore, EventStoreError, EventStoreManagement, InMemoryEventEntryStore,
        InMemoryEventStore, PartialStreamSupport, SerializingEventStore, SnapshotEventStore,
    };
    use crate::repository::{EventSourcingRepository, RepositoryError, SnapshotTrigger};
    use crate::serialization::{
        JsonSerializer, SerializationError, SerializedObject, SerializedType,
        UnknownSerializedType, Upcaster, UpcasterChain, UpcastingContext,
    };

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Account {
        id: Option<AggregateId>,
        balance: i64,
        closed: bool,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Opened {
        id: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Deposited {
        amount: i64,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Closed;

    /// Representation written by an older release; replaced by two deposits.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct LegacyTransfer {
        amount: i64,
    }

    impl EventSourcedAggregate for Account {
        fn describe(model: &mut AggregateModel<Self>) {
            model
                .type_identifier("Account")
                .identifier(|a: &Account| a.id.clone())
                .on(|a: &mut Account, e: &Opened| a.id = Some(AggregateId::new(e.id.clone())))
                .on(|a: &mut Account, e: &Deposited| a.balance += e.amount)
                .on(|a: &mut Account, _: &Closed| a.closed = true);
        }

        fn is_deleted(&self) -> bool {
            self.closed
        }
    }

    type Store = Arc<InMemoryEventStore>;

    fn serializer() -> JsonSerializer {
        JsonSerializer::new()
            .register::<Opened>("account.opened")
            .register::<Deposited>("account.deposited")
            .register::<Closed>("account.closed")
            .register::<Account>("account.snapshot")
    }

    fn store(batch_size: usize) -> Store {
        Arc::new(
            SerializingEventStore::new(InMemoryEventEntryStore::new(), serializer())
                .with_batch_size(batch_size),
        )
    }

    fn repository(store: Store) -> EventSourcingRepository<Account, Store> {
        EventSourcingRepository::new(store, &AggregateRegistry::new()).unwrap()
    }

    /// Saves an account with `Opened` at 0 followed by `deposits` deposits of 1.
    fn seed(repo: &EventSourcingRepository<Account, Store>, id: &str, deposits: usize) {
        let mut guard = repo.new_aggregate();
        guard.apply(Opened { id: id.into() }).unwrap();
        for _ in 0..deposits {
            guard.apply(Deposited { amount: 1 }).unwrap();
        }
        repo.save(&mut guard).unwrap();
    }

    fn sequence_numbers(events: &[DomainEventMessage]) -> Vec<u64> {
        events.iter().map(DomainEventMessage::sequence_number).collect()
    }

    #[test]
    fn snapshot_then_batched_tail_rebuilds_state() {
        let store = store(10);
        let repo = repository(store.clone());
        let id = AggregateId::new("acc-1");
        seed(&repo, "acc-1", 109);

        let mut at_30 = repo.new_aggregate();
        at_30
            .initialize_state(store.read_events_range("Account", &id, 0, Some(30)).unwrap())
            .unwrap();
        let snapshot = at_30.create_snapshot().unwrap();
        assert_eq!(snapshot.sequence_number(), 30);
        store.append_snapshot_event("Account", &snapshot).unwrap();

        let events = store
            .read_events("Account", &id)
            .unwrap()
            .collect_events()
            .unwrap();
        assert_eq!(events.len(), 80);
        assert_eq!(events[0].sequence_number(), 30);
        assert_eq!(events[0].payload().downcast_ref::<Account>().map(|a| a.balance), Some(30));
        assert_eq!(sequence_numbers(&events[1..]), (31..110).collect::<Vec<_>>());

        let loaded = repo.load(&id, ExpectedVersion::Exact(109)).unwrap();
        assert_eq!(loaded.aggregate_root().balance, 109);
        assert_eq!(loaded.events_since_snapshot(), 79);
    }

    #[test]
    fn unreadable_snapshot_falls_back_to_full_stream() {
        let backend = Arc::new(InMemoryEventEntryStore::new());
        let writer: Store = Arc::new(SerializingEventStore::from_parts(backend.clone(), Arc::new(serializer())));
        let repo = repository(writer.clone());
        let id = AggregateId::new("acc-1");
        seed(&repo, "acc-1", 4);
        let snapshot = repo.load(&id, ExpectedVersion::Any).unwrap().create_snapshot().unwrap();
        writer.append_snapshot_event("Account", &snapshot).unwrap();

        // Same storage, but the snapshot type is not registered.
        let reader = SerializingEventStore::from_parts(
            backend,
            Arc::new(
                JsonSerializer::new()
                    .register::<Opened>("account.opened")
                    .register::<Deposited>("account.deposited"),
            ),
        );

        let events = reader.read_events("Account", &id).unwrap().collect_events().unwrap();
        assert_eq!(sequence_numbers(&events), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn snapshots_are_pruned_to_the_archive_size() {
        let entries = Arc::new(InMemoryEventEntryStore::new());
        let store: Store = Arc::new(
            SerializingEventStore::from_parts(entries.clone(), Arc::new(serializer()))
                .with_max_snapshots_archived(2),
        );
        let repo = repository(store.clone());
        let id = AggregateId::new("acc-1");
        seed(&repo, "acc-1", 5);

        for last in [1, 3, 5] {
            let mut guard = repo.new_aggregate();
            guard
                .initialize_state(store.read_events_range("Account", &id, 0, Some(last)).unwrap())
                .unwrap();
            store
                .append_snapshot_event("Account", &guard.create_snapshot().unwrap())
                .unwrap();
        }

        assert_eq!(entries.snapshot_count("Account", &id).unwrap(), 2);
        let first = store.read_events("Account", &id).unwrap().next().unwrap().unwrap();
        assert_eq!(first.sequence_number(), 5);
    }

    #[test]
    fn concurrent_writers_conflict_on_the_same_position() {
        let store = store(100);
        let repo = repository(store);
        let id = AggregateId::new("acc-1");
        seed(&repo, "acc-1", 1);

        let mut first = repo.load(&id, ExpectedVersion::Any).unwrap();
        let mut second = repo.load(&id, ExpectedVersion::Any).unwrap();
        first.apply(Deposited { amount: 5 }).unwrap();
        second.apply(Deposited { amount: 7 }).unwrap();

        repo.save(&mut first).unwrap();
        let err = repo.save(&mut second).unwrap_err();

        assert!(matches!(err, RepositoryError::Store(EventStoreError::Concurrency(_))));
        assert_eq!(second.uncommitted_event_count(), 1);
        assert_eq!(repo.load(&id, ExpectedVersion::Exact(2)).unwrap().aggregate_root().balance, 6);
    }

    #[test]
    fn stale_versions_and_deleted_aggregates_are_refused() {
        let repo = repository(store(100));
        let id = AggregateId::new("acc-1");
        seed(&repo, "acc-1", 2);

        let err = repo.load(&id, ExpectedVersion::Exact(1)).unwrap_err();
        assert_eq!(
            err,
            RepositoryError::ConflictingVersion {
                aggregate_identifier: id.clone(),
                expected: ExpectedVersion::Exact(1),
                actual: Some(2),
            }
        );

        let mut guard = repo.load(&id, ExpectedVersion::Exact(2)).unwrap();
        guard.apply(Closed).unwrap();
        repo.save(&mut guard).unwrap();

        assert!(matches!(
            repo.load(&id, ExpectedVersion::Any),
            Err(RepositoryError::AggregateDeleted { .. })
        ));
        assert!(matches!(
            repo.load(&AggregateId::new("missing"), ExpectedVersion::Any),
            Err(RepositoryError::AggregateNotFound { .. })
        ));
    }

    #[test]
    fn unknown_types_do_not_break_replay() {
        let backend = Arc::new(InMemoryEventEntryStore::new());
        let legacy = SerializingEventStore::from_parts(
            backend.clone(),
            Arc::new(serializer().register::<LegacyTransfer>("account.transfer")),
        );
        let id = AggregateId::new("acc-1");
        let mut events = vec![DomainEventMessage::new(
            id.clone(),
            0,
            Payload::new(Opened { id: "acc-1".into() }),
            MetaData::empty(),
        )];
        events.push(DomainEventMessage::new(
            id.clone(),
            1,
            Payload::new(LegacyTransfer { amount: 3 }),
            MetaData::empty(),
        ));
        events.push(DomainEventMessage::new(id.clone(), 2, Payload::new(Deposited { amount: 4 }), MetaData::empty()));
        legacy.append_events("Account", &events).unwrap();

        let current: Store = Arc::new(SerializingEventStore::from_parts(backend, Arc::new(serializer())));
        let read = current.read_events("Account", &id).unwrap().collect_events().unwrap();
        let unknown = read[1].payload().downcast_ref::<UnknownSerializedType>().unwrap();
        assert_eq!(unknown.serialized_type().name, "account.transfer");
        assert_eq!(unknown.data(), &json!({ "amount": 3 }));

        let loaded = repository(current).load(&id, ExpectedVersion::Exact(2)).unwrap();
        assert_eq!(loaded.aggregate_root().balance, 4);
    }

    struct SplitLegacyTransfer;

    impl Upcaster for SplitLegacyTransfer {
        fn can_upcast(&self, serialized_type: &SerializedType) -> bool {
            serialized_type.name == "account.transfer"
        }

        fn upcast(
            &self,
            object: SerializedObject,
            _context: &UpcastingContext<'_>,
        ) -> Result<Vec<SerializedObject>, SerializationError> {
            let amount = object.data["amount"]
                .as_i64()
                .ok_or_else(|| SerializationError::Upcasting("transfer without amount".into()))?;
            let deposit = SerializedObject::new(
                json!({ "amount": amount }),
                SerializedType::named("account.deposited"),
            );
            Ok(vec![deposit.clone(), deposit])
        }
    }

    #[test]
    fn upcasters_expand_records_into_several_events() {
        let backend = Arc::new(InMemoryEventEntryStore::new());
        let legacy = SerializingEventStore::from_parts(
            backend.clone(),
            Arc::new(serializer().register::<LegacyTransfer>("account.transfer")),
        );
        let id = AggregateId::new("acc-1");
        let transfers: Vec<DomainEventMessage> = (0..5)
            .map(|seq| {
                DomainEventMessage::new(
                    id.clone(),
                    seq,
                    Payload::new(LegacyTransfer { amount: 10 }),
                    MetaData::with("batch", "import"),
                )
            })
            .collect();
        legacy.append_events("Account", &transfers).unwrap();

        let current = SerializingEventStore::from_parts(backend, Arc::new(serializer()))
            .with_batch_size(2)
            .with_upcasters(UpcasterChain::new().with(SplitLegacyTransfer));
        let events = current.read_events("Account", &id).unwrap().collect_events().unwrap();

        assert_eq!(events.len(), 10);
        assert_eq!(sequence_numbers(&events), vec![0, 0, 1, 1, 2, 2, 3, 3, 4, 4]);
        for pair in events.chunks(2) {
            assert_eq!(pair[0].identifier(), pair[1].identifier());
            assert_eq!(pair[0].timestamp(), pair[1].timestamp());
            assert_eq!(pair[1].meta_data().get("batch"), Some(&json!("import")));
            assert_eq!(pair[1].payload().downcast_ref::<Deposited>(), Some(&Deposited { amount: 10 }));
        }
        let original: Vec<EventId> = transfers.iter().map(|e| e.identifier()).collect();
        let expanded: Vec<EventId> = events.iter().step_by(2).map(|e| e.identifier()).collect();
        assert_eq!(original, expanded);
    }

    #[test]
    fn visit_events_orders_by_timestamp_and_filters() {
        let store = store(2);
        let t0 = Utc::now();
        let at = |secs: i64| t0 + Duration::seconds(secs);
        let event = |id: &str, seq: u64, secs: i64| {
            DomainEventMessage::from_parts(
                EventId::new(),
                AggregateId::new(id),
                seq,
                Payload::new(Deposited { amount: secs }),
                MetaData::empty(),
                at(secs),
            )
        };
        store
            .append_events("Account", &[event("a", 0, 0), event("a", 1, 2), event("a", 2, 4)])
            .unwrap();
        store
            .append_events("Order", &[event("b", 0, 1), event("b", 1, 3)])
            .unwrap();

        let visit = |criteria: EventCriteria| {
            let mut seen = Vec::new();
            store
                .visit_events(&criteria, &mut |e: &DomainEventMessage| {
                    seen.push((e.aggregate_identifier().to_string(), e.sequence_number()))
                })
                .unwrap();
            seen
        };
        let key = |id: &str, seq: u64| (id.to_string(), seq);

        assert_eq!(
            visit(EventCriteria::all()),
            vec![key("a", 0), key("b", 0), key("a", 1), key("b", 1), key("a", 2)]
        );
        assert_eq!(
            visit(EventCriteria::all().after(at(1)).aggregate_type("Account")),
            vec![key("a", 1), key("a", 2)]
        );
        assert_eq!(
            visit(EventCriteria::all().on_or_after(at(1)).before(at(4))),
            vec![key("b", 0), key("a", 1), key("b", 1)]
        );
    }

    #[test]
    fn tracked_reads_resume_after_a_token() {
        let store = store(10);
        let repo = repository(store.clone());
        seed(&repo, "a", 1);
        seed(&repo, "b", 2);

        let head = store.read_tracked(None, 3).unwrap();
        assert_eq!(head.len(), 3);
        assert!(head.iter().all(|t| t.aggregate_type == "Account"));
        assert_eq!(head[2].event.aggregate_identifier(), &AggregateId::new("b"));

        let tail = store.read_tracked(Some(head[2].token), 10).unwrap();
        assert_eq!(tail.len(), 2);
        assert!(tail.iter().all(|t| t.token > head[2].token));
        assert!(store.read_tracked(Some(tail[1].token), 10).unwrap().is_empty());
    }

    /// Reversibly wraps the `secret` metadata entry, keyed by aggregate.
    struct Seal {
        name: &'static str,
        unwrapped: Arc<Mutex<Vec<String>>>,
    }

    fn secret(event: &DomainEventMessage) -> String {
        event
            .meta_data()
            .get("secret")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }

    impl EventStreamDecorator for Seal {
        fn decorate_for_read(
            &self,
            _aggregate_type: &str,
            aggregate_identifier: &AggregateId,
            stream: DomainEventStream,
        ) -> DomainEventStream {
            let prefix = format!("{}[{aggregate_identifier}](", self.name);
            let name = self.name;
            let unwrapped = self.unwrapped.clone();
            stream.map_events(move |e| {
                let sealed = secret(&e);
                let opened = match sealed.strip_prefix(&prefix).and_then(|s| s.strip_suffix(')')) {
                    Some(inner) => inner.to_string(),
                    None => format!("{name} cannot unwrap {sealed}"),
                };
                unwrapped.lock().unwrap().push(opened.clone());
                e.and_meta_data(&MetaData::with("secret", opened))
            })
        }

        fn decorate_for_append(
            &self,
            _aggregate_type: &str,
            aggregate_identifier: &AggregateId,
            events: Vec<DomainEventMessage>,
        ) -> Vec<DomainEventMessage> {
            events
                .into_iter()
                .map(|e| {
                    assert_eq!(e.aggregate_identifier(), aggregate_identifier);
                    let sealed = format!("{}[{aggregate_identifier}]({})", self.name, secret(&e));
                    e.and_meta_data(&MetaData::with("secret", sealed))
                })
                .collect()
        }
    }

    #[test]
    fn stacked_decorators_unwrap_what_they_wrapped() {
        let store = store(10);
        let unwrapped = Arc::new(Mutex::new(Vec::new()));
        let repo = repository(store.clone())
            .with_decorator(Seal { name: "enc", unwrapped: unwrapped.clone() })
            .with_decorator(Seal { name: "zip", unwrapped: unwrapped.clone() });
        let id = AggregateId::new("acc-1");

        let mut guard = repo.new_aggregate();
        guard
            .apply_with_meta_data(Opened { id: "acc-1".into() }, MetaData::with("secret", "s3cr3t"))
            .unwrap();
        repo.save(&mut guard).unwrap();

        let stored = store.read_events("Account", &id).unwrap().collect_events().unwrap();
        assert_eq!(stored[0].meta_data().get("secret"), Some(&json!("enc[acc-1](zip[acc-1](s3cr3t))")));

        let loaded = repo.load(&id, ExpectedVersion::Exact(0)).unwrap();
        assert_eq!(loaded.identifier(), Some(id));
        assert_eq!(*unwrapped.lock().unwrap(), vec!["zip[acc-1](s3cr3t)", "s3cr3t"]);
    }

    #[test]
    fn events_are_published_only_after_a_successful_append() {
        let bus = Arc::new(ClusteringEventBus::default());
        let published = Arc::new(Mutex::new(Vec::new()));
        let sink = published.clone();
        bus.subscribe(Arc::new(FnEventListener::new("audit", move |e: &EventRef| {
            sink.lock().unwrap().push(e.identifier());
            Ok(())
        })))
        .unwrap();

        let repo = repository(store(10)).with_event_bus(bus.clone());
        let id = AggregateId::new("acc-1");
        seed(&repo, "acc-1", 1);
        assert_eq!(published.lock().unwrap().len(), 2);

        let mut first = repo.load(&id, ExpectedVersion::Any).unwrap();
        let mut second = repo.load(&id, ExpectedVersion::Any).unwrap();
        first.apply(Deposited { amount: 1 }).unwrap();
        second.apply(Deposited { amount: 1 }).unwrap();
        let saved = repo.save(&mut first).unwrap();
        assert!(repo.save(&mut second).is_err());

        let published = published.lock().unwrap();
        assert_eq!(published.len(), 3);
        assert_eq!(published[2], saved[0].identifier());
    }

    #[test]
    fn annotated_listeners_receive_resolved_parameters() {
        let bus = Arc::new(ClusteringEventBus::default());
        let deposits = Arc::new(Mutex::new(Vec::new()));
        let sink = deposits.clone();
        let listener = AnnotatedEventListener::new(
            "projections::Balances",
            vec![
                MemberDescriptor::event_handler("on_deposit", move |args| {
                    let amount = args[0].as_payload::<Deposited>().map_or(0, |d| d.amount);
                    let seq = args[1].as_sequence_number().unwrap_or_default();
                    sink.lock().unwrap().push((seq, amount));
                    Ok(())
                })
                .parameter(ParameterDescriptor::payload::<Deposited>())
                .parameter(ParameterDescriptor::sequence_number()),
            ],
            &default_factories(),
        )
        .unwrap();
        bus.subscribe(Arc::new(listener)).unwrap();

        let repo = repository(store(10)).with_event_bus(bus);
        let mut guard = repo.new_aggregate();
        guard.apply(Opened { id: "acc-1".into() }).unwrap();
        guard.apply(Deposited { amount: 5 }).unwrap();
        guard.apply(Deposited { amount: 8 }).unwrap();
        repo.save(&mut guard).unwrap();

        assert_eq!(*deposits.lock().unwrap(), vec![(1, 5), (2, 8)]);
    }

    #[derive(Debug, Clone)]
    struct Deposit {
        account: String,
        amount: i64,
        expected: ExpectedVersion,
    }

    impl Command for Deposit {
        fn target_aggregate_id(&self) -> AggregateId {
            AggregateId::new(self.account.clone())
        }

        fn expected_version(&self) -> ExpectedVersion {
            self.expected
        }
    }

    fn deposit(account: &str, amount: i64, expected: ExpectedVersion) -> Deposit {
        Deposit {
            account: account.into(),
            amount,
            expected,
        }
    }

    fn handle_deposit(command: &Deposit, guard: &mut EventSourcedAggregateGuard<Account>) -> DomainResult<()> {
        if command.amount <= 0 {
            return Err(DomainError::validation("deposit must be positive"));
        }
        if guard.identifier().is_none() {
            guard.apply(Opened { id: command.account.clone() })?;
        }
        guard.apply(Deposited { amount: command.amount })
    }

    #[test]
    fn dispatcher_creates_updates_and_rejects() {
        let store = store(10);
        let dispatcher = CommandDispatcher::new(repository(store.clone()));

        let created = dispatcher
            .dispatch(&deposit("acc-1", 10, ExpectedVersion::Any), handle_deposit)
            .unwrap();
        assert_eq!(sequence_numbers(&created), vec![0, 1]);

        let updated = dispatcher
            .dispatch(&deposit("acc-1", 5, ExpectedVersion::Exact(1)), handle_deposit)
            .unwrap();
        assert_eq!(sequence_numbers(&updated), vec![2]);

        assert!(matches!(
            dispatcher.dispatch(&deposit("acc-1", 5, ExpectedVersion::Exact(1)), handle_deposit),
            Err(DispatchError::Concurrency(_))
        ));
        assert!(matches!(
            dispatcher.dispatch(&deposit("acc-1", -1, ExpectedVersion::Any), handle_deposit),
            Err(DispatchError::Validation(_))
        ));
        assert!(matches!(
            dispatcher.dispatch(&deposit("acc-2", 5, ExpectedVersion::Exact(0)), handle_deposit),
            Err(DispatchError::NotFound)
        ));

        let account = dispatcher
            .repository()
            .load(&AggregateId::new("acc-1"), ExpectedVersion::Exact(2))
            .unwrap();
        assert_eq!(account.aggregate_root().balance, 15);
    }

    #[test]
    fn snapshot_trigger_counts_replayed_and_appended_events() {
        let entries = Arc::new(InMemoryEventEntryStore::new());
        let store: Store = Arc::new(SerializingEventStore::from_parts(entries.clone(), Arc::new(serializer())));
        let dispatcher = CommandDispatcher::new(
            repository(store.clone()).with_snapshot_trigger(SnapshotTrigger::EventCount(5)),
        );
        let id = AggregateId::new("acc-1");

        // 2 events, then 3 more single-event commands: the fifth event triggers.
        for _ in 0..4 {
            dispatcher
                .dispatch(&deposit("acc-1", 1, ExpectedVersion::Any), handle_deposit)
                .unwrap();
        }
        assert_eq!(entries.snapshot_count("Account", &id).unwrap(), 1);

        let first = store.read_events("Account", &id).unwrap().next().unwrap().unwrap();
        assert_eq!(first.sequence_number(), 4);
        assert!(first.payload().is::<Account>());

        dispatcher
            .dispatch(&deposit("acc-1", 1, ExpectedVersion::Exact(4)), handle_deposit)
            .unwrap();
        assert_eq!(entries.snapshot_count("Account", &id).unwrap(), 1);
        let account = dispatcher.repository().load(&id, ExpectedVersion::Exact(5)).unwrap();
        assert_eq!(account.aggregate_root().balance, 5);
    }

    proptest! {
        #[test]
        fn range_reads_return_exactly_the_requested_window(
            len in 1u64..40,
            batch_size in 1usize..8,
            first in 0u64..45,
            span in proptest::option::of(0u64..45),
        ) {
            let store = store(batch_size);
            let id = AggregateId::new("r");
            let events: Vec<DomainEventMessage> = (0..len)
                .map(|seq| DomainEventMessage::new(id.clone(), seq, Payload::new(Deposited { amount: 1 }), MetaData::empty()))
                .collect();
            store.append_events("Account", &events).unwrap();

            let last = span.map(|s| first + s);
            let read = store
                .read_events_range("Account", &id, first, last)
                .unwrap()
                .collect_events()
                .unwrap();
            let expected: Vec<u64> = (first..len).filter(|s| last.is_none_or(|l| *s <= l)).collect();
            prop_assert_eq!(sequence_numbers(&read), expected);
        }
    }
}
