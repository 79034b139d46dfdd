use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use keel_core::{
    AggregateId, AggregateModel, AggregateRegistry, DomainEventMessage, DomainResult,
    EventSourcedAggregate, EventSourcedAggregateGuard, ExpectedVersion, MetaData, Payload,
};
use keel_events::Command;
use keel_infra::{
    CommandDispatcher, EventSourcingRepository, EventStore, InMemoryEventEntryStore,
    InMemoryEventStore, JsonSerializer, PartialStreamSupport, SerializedObject, SerializedType,
    SerializationError, SerializingEventStore, SnapshotEventStore, SnapshotTrigger, Upcaster,
    UpcasterChain, UpcastingContext,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Counter {
    id: Option<AggregateId>,
    value: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Started {
    id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Incremented {
    by: i64,
}

impl EventSourcedAggregate for Counter {
    fn describe(model: &mut AggregateModel<Self>) {
        model
            .type_identifier("Counter")
            .identifier(|c: &Counter| c.id.clone())
            .on(|c: &mut Counter, e: &Started| c.id = Some(AggregateId::new(e.id.clone())))
            .on(|c: &mut Counter, e: &Incremented| c.value += e.by);
    }
}

#[derive(Debug, Clone)]
struct Increment {
    counter: AggregateId,
}

impl Command for Increment {
    fn target_aggregate_id(&self) -> AggregateId {
        self.counter.clone()
    }
}

fn handle_increment(command: &Increment, guard: &mut EventSourcedAggregateGuard<Counter>) -> DomainResult<()> {
    if guard.identifier().is_none() {
        guard.apply(Started { id: command.counter.to_string() })?;
    }
    guard.apply(Incremented { by: 1 })
}

fn serializer() -> JsonSerializer {
    JsonSerializer::new()
        .register::<Started>("counter.started")
        .register::<Incremented>("counter.incremented")
        .register::<Counter>("counter.snapshot")
}

fn store() -> Arc<InMemoryEventStore> {
    Arc::new(SerializingEventStore::new(InMemoryEventEntryStore::new(), serializer()))
}

fn stream(id: &AggregateId, count: u64) -> Vec<DomainEventMessage> {
    std::iter::once(Payload::new(Started { id: id.to_string() }))
        .chain((1..count).map(|_| Payload::new(Incremented { by: 1 })))
        .enumerate()
        .map(|(seq, payload)| DomainEventMessage::new(id.clone(), seq as u64, payload, MetaData::empty()))
        .collect()
}

fn bench_command_execution_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_execution_latency");
    group.sample_size(1000);

    group.bench_function("create_fresh", |b| {
        let repository = EventSourcingRepository::<Counter, _>::new(store(), &AggregateRegistry::new()).unwrap();
        let dispatcher = CommandDispatcher::new(repository);
        b.iter(|| {
            let command = Increment { counter: AggregateId::generate() };
            dispatcher.dispatch(black_box(&command), handle_increment).unwrap();
        });
    });

    for trigger in [SnapshotTrigger::Never, SnapshotTrigger::EventCount(50)] {
        group.bench_with_input(
            BenchmarkId::new("increment_with_history", format!("{trigger:?}")),
            &trigger,
            |b, &trigger| {
                let repository = EventSourcingRepository::<Counter, _>::new(store(), &AggregateRegistry::new())
                    .unwrap()
                    .with_snapshot_trigger(trigger);
                let dispatcher = CommandDispatcher::new(repository);
                let command = Increment { counter: AggregateId::new("counter-1") };
                for _ in 0..500 {
                    dispatcher.dispatch(&command, handle_increment).unwrap();
                }
                b.iter(|| dispatcher.dispatch(black_box(&command), handle_increment).unwrap());
            },
        );
    }

    group.finish();
}

fn bench_event_append_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_append_throughput");

    for batch_size in [1u64, 10, 100, 1000] {
        group.throughput(Throughput::Elements(batch_size));
        group.bench_with_input(BenchmarkId::new("batch_append", batch_size), &batch_size, |b, &size| {
            let store = store();
            b.iter(|| {
                let events = stream(&AggregateId::generate(), size);
                store.append_events("Counter", black_box(&events)).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_replay_speed(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay_speed");
    let registry = AggregateRegistry::new();

    for event_count in [10u64, 100, 1000, 10000] {
        let store = store();
        let id = AggregateId::new("counter-1");
        store.append_events("Counter", &stream(&id, event_count)).unwrap();
        let repository = EventSourcingRepository::<Counter, _>::new(store.clone(), &registry).unwrap();

        group.throughput(Throughput::Elements(event_count));
        group.bench_with_input(BenchmarkId::new("full_stream", event_count), &event_count, |b, _| {
            b.iter(|| repository.load(black_box(&id), ExpectedVersion::Any).unwrap());
        });

        // Snapshot ten events before the head of the stream.
        let mut guard = repository.new_aggregate();
        guard
            .initialize_state(
                store
                    .read_events_range("Counter", &id, 0, Some(event_count.saturating_sub(10)))
                    .unwrap(),
            )
            .unwrap();
        if let Some(snapshot) = guard.create_snapshot() {
            store.append_snapshot_event("Counter", &snapshot).unwrap();
        }
        group.bench_with_input(BenchmarkId::new("from_snapshot", event_count), &event_count, |b, _| {
            b.iter(|| repository.load(black_box(&id), ExpectedVersion::Any).unwrap());
        });
    }

    group.finish();
}

/// Rewrites every stored increment into two increments.
struct DoubleIncrements;

impl Upcaster for DoubleIncrements {
    fn can_upcast(&self, serialized_type: &SerializedType) -> bool {
        serialized_type.name == "counter.incremented"
    }

    fn upcast(
        &self,
        object: SerializedObject,
        _context: &UpcastingContext<'_>,
    ) -> Result<Vec<SerializedObject>, SerializationError> {
        Ok(vec![object.clone(), object])
    }
}

fn bench_upcasting_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("upcasting_overhead");
    let backend = Arc::new(InMemoryEventEntryStore::new());
    let id = AggregateId::new("counter-1");
    SerializingEventStore::from_parts(backend.clone(), Arc::new(serializer()))
        .append_events("Counter", &stream(&id, 1000))
        .unwrap();

    let plain = SerializingEventStore::from_parts(backend.clone(), Arc::new(serializer()));
    let upcasting = SerializingEventStore::from_parts(backend, Arc::new(serializer()))
        .with_upcasters(UpcasterChain::new().with(DoubleIncrements));

    group.bench_function("read_without_upcasters", |b| {
        b.iter(|| plain.read_events("Counter", black_box(&id)).unwrap().count());
    });
    group.bench_function("read_with_expanding_upcaster", |b| {
        b.iter(|| upcasting.read_events("Counter", black_box(&id)).unwrap().count());
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_command_execution_latency,
    bench_event_append_throughput,
    bench_replay_speed,
    bench_upcasting_overhead
);
criterion_main!(benches);
