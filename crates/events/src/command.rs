use keel_core::{AggregateId, ExpectedVersion};

/// A command targets a specific aggregate (command abstraction).
///
/// Commands represent **intent** - a request to perform an action on an aggregate.
/// They are **transient** (not persisted) and are transformed into events (which are persisted).
///
/// ## Command vs Event
///
/// - **Command**: Intent to do something (e.g., "Deposit 10 into account A")
/// - **Event**: Fact that something happened (e.g., "Deposited { amount: 10 }")
///
/// Commands are rejected if invalid (validation errors). Events represent accepted changes.
///
/// ## Aggregate Targeting
///
/// Commands must specify which aggregate they target via `target_aggregate_id()`. This enables:
/// - **Routing**: Infrastructure can route commands to the correct aggregate instance
/// - **Isolation**: Each command operates on one aggregate (transaction boundary)
/// - **Concurrency**: Different aggregates can process commands concurrently
///
/// ## Optimistic Concurrency
///
/// A command may state the aggregate version it was decided against. The
/// dispatcher rejects it when the stored aggregate has moved on.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_aggregate_id(&self) -> AggregateId;

    fn expected_version(&self) -> ExpectedVersion {
        ExpectedVersion::Any
    }
}
