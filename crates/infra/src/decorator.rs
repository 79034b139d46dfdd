//! Hooks around the event streams a repository reads and writes.

use keel_core::{AggregateId, DomainEventMessage, DomainEventStream, EventMessage, MetaData};

/// Wraps the streams passing between a repository and its event store.
///
/// The first decorator registered on a repository is the outermost layer:
/// on read it sees the stored stream first, on append it sees the events
/// last. Reversible decorators (encryption, compression) therefore undo each
/// other in the right order when stacked.
pub trait EventStreamDecorator: Send + Sync {
    fn decorate_for_read(
        &self,
        aggregate_type: &str,
        aggregate_identifier: &AggregateId,
        stream: DomainEventStream,
    ) -> DomainEventStream {
        let _ = (aggregate_type, aggregate_identifier);
        stream
    }

    /// `events` all belong to `aggregate_identifier` and are in sequence
    /// order.
    fn decorate_for_append(
        &self,
        aggregate_type: &str,
        aggregate_identifier: &AggregateId,
        events: Vec<DomainEventMessage>,
    ) -> Vec<DomainEventMessage> {
        let _ = (aggregate_type, aggregate_identifier);
        events
    }
}

/// Adds fixed metadata (e.g. the writing service's name) to every appended
/// event. Existing keys of the event take precedence.
#[derive(Debug, Clone)]
pub struct MetaDataDecorator {
    meta_data: MetaData,
}

impl MetaDataDecorator {
    pub fn new(meta_data: MetaData) -> Self {
        Self { meta_data }
    }
}

impl EventStreamDecorator for MetaDataDecorator {
    fn decorate_for_append(
        &self,
        _aggregate_type: &str,
        _aggregate_identifier: &AggregateId,
        events: Vec<DomainEventMessage>,
    ) -> Vec<DomainEventMessage> {
        events
            .into_iter()
            .map(|event| {
                let merged = self.meta_data.merged_with(event.meta_data());
                event.with_meta_data(merged)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::Payload;

    #[test]
    fn event_meta_data_wins_over_decorator_defaults() {
        let decorator = MetaDataDecorator::new(MetaData::with("origin", "billing").and("user", "system"));
        let event = DomainEventMessage::new("a", 0, Payload::new(()), MetaData::with("user", "ada"));

        let decorated = decorator.decorate_for_append("Account", &AggregateId::new("a"), vec![event]);

        assert_eq!(decorated[0].meta_data().get("origin"), Some(&"billing".into()));
        assert_eq!(decorated[0].meta_data().get("user"), Some(&"ada".into()));
    }
}
