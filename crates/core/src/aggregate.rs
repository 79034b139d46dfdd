//! Aggregate model declaration and the per-type configuration registry.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::entity::EntityModel;
use crate::error::{DomainError, DomainResult};
use crate::id::AggregateId;
use crate::message::{DomainEventMessage, EventMessage};
use crate::payload::{simple_type_name, PayloadType};

/// An aggregate root whose state is rebuilt from its own events.
///
/// Implementations declare their event handlers, identifier and child
/// entities once in [`describe`](EventSourcedAggregate::describe). The framework
/// turns that declaration into an immutable [`AggregateConfiguration`] which is
/// cached per type by an [`AggregateRegistry`].
///
/// Handlers must be deterministic and must not perform IO: the same stream of
/// events always produces the same state.
pub trait EventSourcedAggregate: Send + Sync + Sized + 'static {
    fn describe(model: &mut AggregateModel<Self>);

    /// Whether the aggregate's own state marks it as removed. Repositories
    /// refuse to hand out deleted aggregates.
    fn is_deleted(&self) -> bool {
        false
    }
}

/// Optimistic concurrency expectation for an aggregate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (useful for idempotent commands, migrations, etc.).
    Any,
    /// Require the aggregate to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    /// `actual` is the sequence number of the last committed event, `None` for
    /// an aggregate without events.
    pub fn matches(self, actual: Option<u64>) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => actual == Some(v),
        }
    }

    pub fn check(self, actual: Option<u64>) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual:?})"
            )))
        }
    }
}

type IdentifierAccessor<A> = Box<dyn Fn(&A) -> Option<AggregateId> + Send + Sync>;

/// Builder handed to [`EventSourcedAggregate::describe`].
pub struct AggregateModel<A> {
    type_identifier: Option<String>,
    identifier: Option<IdentifierAccessor<A>>,
    handlers: EntityModel<A>,
}

impl<A: 'static> AggregateModel<A> {
    fn new() -> Self {
        Self {
            type_identifier: None,
            identifier: None,
            handlers: EntityModel::new(),
        }
    }

    /// Override the discriminator used as the event stream's aggregate type.
    ///
    /// Defaults to the simple Rust type name.
    pub fn type_identifier(&mut self, name: impl Into<String>) -> &mut Self {
        self.type_identifier = Some(name.into());
        self
    }

    /// Declare how to read the aggregate identifier.
    ///
    /// Returning `None` means the identifier has not been assigned yet; the
    /// first applied event is expected to assign it.
    pub fn identifier<F>(&mut self, accessor: F) -> &mut Self
    where
        F: Fn(&A) -> Option<AggregateId> + Send + Sync + 'static,
    {
        self.identifier = Some(Box::new(accessor));
        self
    }

    pub fn on<E, F>(&mut self, handler: F) -> &mut Self
    where
        E: Any + Send + Sync,
        F: Fn(&mut A, &E) + Send + Sync + 'static,
    {
        self.handlers.on::<E, F>(handler);
        self
    }

    pub fn on_message<E, F>(&mut self, handler: F) -> &mut Self
    where
        E: Any + Send + Sync,
        F: Fn(&mut A, &E, &DomainEventMessage) + Send + Sync + 'static,
    {
        self.handlers.on_message::<E, F>(handler);
        self
    }

    pub fn entities<C, F>(&mut self, access: F, model: EntityModel<C>) -> &mut Self
    where
        C: 'static,
        F: for<'a> Fn(&'a mut A) -> Vec<&'a mut C> + Send + Sync + 'static,
    {
        self.handlers.entities(access, model);
        self
    }
}

/// Immutable description of an aggregate type: its stream discriminator, how
/// to read its identifier and its event handler tables.
pub struct AggregateConfiguration<A> {
    type_identifier: String,
    identifier: IdentifierAccessor<A>,
    handlers: EntityModel<A>,
}

impl<A: EventSourcedAggregate> AggregateConfiguration<A> {
    /// Run `A::describe` and validate the result.
    ///
    /// This does not cache anything; use [`AggregateRegistry::configuration`]
    /// to share configurations.
    pub fn describe() -> DomainResult<Self> {
        let mut model = AggregateModel::<A>::new();
        A::describe(&mut model);

        let type_name = std::any::type_name::<A>();
        let identifier = model.identifier.ok_or_else(|| {
            DomainError::incompatible(format!(
                "aggregate type {type_name} does not declare an identifier accessor"
            ))
        })?;

        let type_identifier = match model.type_identifier {
            Some(name) if name.trim().is_empty() => {
                return Err(DomainError::incompatible(format!(
                    "aggregate type {type_name} declares an empty type identifier"
                )));
            }
            Some(name) => name,
            None => simple_type_name(type_name).to_string(),
        };

        Ok(Self {
            type_identifier,
            identifier,
            handlers: model.handlers,
        })
    }

    pub fn type_identifier(&self) -> &str {
        &self.type_identifier
    }

    /// Current identifier of `aggregate`, if assigned.
    pub fn identifier(&self, aggregate: &A) -> Option<AggregateId> {
        (self.identifier)(aggregate)
    }

    pub fn handles(&self, payload_type: &PayloadType) -> bool {
        self.handlers.handles(payload_type)
    }

    /// Dispatch `message` to the root handler and all child entity handlers.
    pub fn handle(&self, aggregate: &mut A, message: &DomainEventMessage) -> usize {
        let handled = self.handlers.handle(aggregate, message);
        if handled == 0 {
            tracing::trace!(
                aggregate_type = %self.type_identifier,
                payload_type = message.payload().payload_type().simple_name(),
                "no handler for event"
            );
        }
        handled
    }
}

impl<A> fmt::Debug for AggregateConfiguration<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateConfiguration")
            .field("type_identifier", &self.type_identifier)
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}

/// Thread-safe cache of aggregate configurations keyed by aggregate type.
///
/// Lookups are insert-if-absent: concurrent first lookups may each build a
/// configuration, but only one is stored and every caller gets that one.
/// Configuration failures are reported on every lookup and never cached.
#[derive(Default)]
pub struct AggregateRegistry {
    configurations: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl AggregateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configuration<A: EventSourcedAggregate>(
        &self,
    ) -> DomainResult<Arc<AggregateConfiguration<A>>> {
        let key = TypeId::of::<A>();
        {
            let configurations = self
                .configurations
                .read()
                .map_err(|_| DomainError::inaccessible("aggregate registry lock poisoned"))?;
            if let Some(existing) = configurations.get(&key) {
                return downcast_configuration(existing);
            }
        }

        let built: Arc<dyn Any + Send + Sync> = Arc::new(AggregateConfiguration::<A>::describe()?);

        let mut configurations = self
            .configurations
            .write()
            .map_err(|_| DomainError::inaccessible("aggregate registry lock poisoned"))?;
        let stored = configurations.entry(key).or_insert(built);
        downcast_configuration(stored)
    }

    /// Number of cached configurations.
    pub fn len(&self) -> usize {
        self.configurations.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn downcast_configuration<A: EventSourcedAggregate>(
    stored: &Arc<dyn Any + Send + Sync>,
) -> DomainResult<Arc<AggregateConfiguration<A>>> {
    Arc::clone(stored)
        .downcast::<AggregateConfiguration<A>>()
        .map_err(|_| {
            DomainError::inaccessible(format!(
                "registry entry for {} has an unexpected type",
                std::any::type_name::<A>()
            ))
        })
}

impl fmt::Debug for AggregateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateRegistry")
            .field("configurations", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetaData;
    use crate::payload::Payload;
    use std::thread;

    #[derive(Debug, Default)]
    struct Counter {
        id: Option<AggregateId>,
        total: i64,
    }

    struct Created(AggregateId);
    struct Added(i64);

    impl EventSourcedAggregate for Counter {
        fn describe(model: &mut AggregateModel<Self>) {
            model
                .identifier(|c: &Counter| c.id.clone())
                .on(|c: &mut Counter, e: &Created| c.id = Some(e.0.clone()))
                .on(|c: &mut Counter, e: &Added| c.total += e.0);
        }
    }

    #[derive(Debug, Default)]
    struct Anonymous;

    impl EventSourcedAggregate for Anonymous {
        fn describe(model: &mut AggregateModel<Self>) {
            model.on(|_: &mut Anonymous, _: &Added| {});
        }
    }

    #[derive(Debug, Default)]
    struct Renamed {
        id: Option<AggregateId>,
    }

    impl EventSourcedAggregate for Renamed {
        fn describe(model: &mut AggregateModel<Self>) {
            model
                .type_identifier("LegacyName")
                .identifier(|r: &Renamed| r.id.clone());
        }
    }

    #[test]
    fn expected_version_matches_last_sequence_number() {
        assert!(ExpectedVersion::Any.matches(None));
        assert!(ExpectedVersion::Exact(3).matches(Some(3)));
        assert!(!ExpectedVersion::Exact(3).matches(Some(4)));
        assert!(!ExpectedVersion::Exact(0).matches(None));
        assert!(matches!(
            ExpectedVersion::Exact(1).check(Some(2)),
            Err(DomainError::Conflict(_))
        ));
    }

    #[test]
    fn type_identifier_defaults_to_simple_type_name() {
        let registry = AggregateRegistry::new();
        let config = registry.configuration::<Counter>().unwrap();
        assert_eq!(config.type_identifier(), "Counter");

        let renamed = registry.configuration::<Renamed>().unwrap();
        assert_eq!(renamed.type_identifier(), "LegacyName");
    }

    #[test]
    fn configuration_is_cached_per_type() {
        let registry = AggregateRegistry::new();
        let first = registry.configuration::<Counter>().unwrap();
        let second = registry.configuration::<Counter>().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn concurrent_first_lookups_share_one_configuration() {
        let registry = Arc::new(AggregateRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.configuration::<Counter>().unwrap())
            })
            .collect();
        let configs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let stored = registry.configuration::<Counter>().unwrap();
        assert!(configs.iter().all(|c| Arc::ptr_eq(c, &stored)));
    }

    #[test]
    fn missing_identifier_is_a_configuration_error_and_is_not_cached() {
        let registry = AggregateRegistry::new();

        let err = registry.configuration::<Anonymous>().unwrap_err();
        assert!(matches!(err, DomainError::IncompatibleAggregate(ref msg) if msg.contains("Anonymous")));
        assert!(registry.configuration::<Anonymous>().is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn dispatches_by_payload_type() {
        let config = AggregateConfiguration::<Counter>::describe().unwrap();
        let mut counter = Counter::default();

        let added = DomainEventMessage::new("c-1", 0, Payload::new(Added(5)), MetaData::empty());
        let ignored = DomainEventMessage::new("c-1", 1, Payload::new("noise"), MetaData::empty());

        assert_eq!(config.handle(&mut counter, &added), 1);
        assert_eq!(config.handle(&mut counter, &ignored), 0);
        assert_eq!(counter.total, 5);
        assert!(config.handles(&PayloadType::of::<Added>()));
        assert!(!config.handles(&PayloadType::of::<String>()));
    }
}
