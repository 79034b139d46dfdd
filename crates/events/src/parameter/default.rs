//! Built-in resolvers for messages, metadata and payloads.

use keel_core::{EventMessage, EventRef, PayloadType};

use crate::handler::MemberAnnotation;
use crate::parameter::descriptor::{ParameterDescriptor, ParameterType, ParameterValue, ValueKind};
use crate::parameter::resolver::{ParameterResolver, ParameterResolverFactory, Priority};

/// Resolves messages, metadata entries and the full metadata map.
///
/// Precedence:
/// 1. a message-typed parameter resolves to the message itself, even when it
///    also carries a metadata-key annotation;
/// 2. a metadata-key annotated parameter resolves to that metadata value;
/// 3. a `MetaData`-typed parameter resolves to the whole map.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultParameterResolverFactory;

impl ParameterResolverFactory for DefaultParameterResolverFactory {
    fn create_instance(
        &self,
        _member_annotations: &[MemberAnnotation],
        parameter: &ParameterDescriptor,
    ) -> Option<Box<dyn ParameterResolver>> {
        match parameter.parameter_type {
            ParameterType::Message => return Some(Box::new(MessageParameterResolver { domain_only: false })),
            ParameterType::DomainEventMessage => {
                return Some(Box::new(MessageParameterResolver { domain_only: true }));
            }
            _ => {}
        }

        if let Some((key, required)) = parameter.meta_data_annotation() {
            let (kind, primitive) = match parameter.parameter_type {
                ParameterType::Value { kind, primitive } => (kind, primitive),
                _ => (ValueKind::Any, false),
            };
            return Some(Box::new(AnnotatedMetaDataParameterResolver {
                key: key.to_string(),
                kind,
                mandatory: primitive || required,
            }));
        }

        if parameter.parameter_type == ParameterType::MetaData {
            return Some(Box::new(MetaDataParameterResolver));
        }

        None
    }

    fn priority(&self) -> Priority {
        Priority::FIRST
    }
}

#[derive(Debug)]
struct MessageParameterResolver {
    domain_only: bool,
}

impl ParameterResolver for MessageParameterResolver {
    fn resolve(&self, message: &EventRef) -> ParameterValue {
        ParameterValue::Message(message.clone())
    }

    fn matches(&self, message: &EventRef) -> bool {
        !self.domain_only || message.as_domain_event().is_some()
    }
}

#[derive(Debug)]
struct AnnotatedMetaDataParameterResolver {
    key: String,
    kind: ValueKind,
    /// Primitive or required parameters cannot be invoked without the entry.
    mandatory: bool,
}

impl ParameterResolver for AnnotatedMetaDataParameterResolver {
    fn resolve(&self, message: &EventRef) -> ParameterValue {
        ParameterValue::Value(message.meta_data().get(&self.key).cloned())
    }

    fn matches(&self, message: &EventRef) -> bool {
        if !self.mandatory {
            return true;
        }
        message
            .meta_data()
            .get(&self.key)
            .is_some_and(|value| self.kind.accepts(value))
    }
}

#[derive(Debug)]
struct MetaDataParameterResolver;

impl ParameterResolver for MetaDataParameterResolver {
    fn resolve(&self, message: &EventRef) -> ParameterValue {
        ParameterValue::MetaData(message.meta_data().clone())
    }

    fn matches(&self, _message: &EventRef) -> bool {
        true
    }
}

/// Resolves the payload of messages carrying a payload of the expected type.
#[derive(Debug, Clone)]
pub struct PayloadParameterResolver {
    payload_type: PayloadType,
}

impl PayloadParameterResolver {
    pub fn new(payload_type: PayloadType) -> Self {
        Self { payload_type }
    }
}

impl ParameterResolver for PayloadParameterResolver {
    fn resolve(&self, message: &EventRef) -> ParameterValue {
        ParameterValue::Payload(message.payload().clone())
    }

    fn matches(&self, message: &EventRef) -> bool {
        message.payload().payload_type() == self.payload_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::ParameterAnnotation;
    use keel_core::{DomainEventMessage, GenericEventMessage, MetaData, Payload};
    use serde_json::json;

    fn domain_event(meta: MetaData) -> EventRef {
        DomainEventMessage::new("agg-1", 4, Payload::new("created"), meta).into_ref()
    }

    fn resolver(parameter: ParameterDescriptor) -> Box<dyn ParameterResolver> {
        DefaultParameterResolverFactory
            .create_instance(&[], &parameter)
            .expect("resolver")
    }

    #[test]
    fn message_typed_parameter_wins_over_metadata_annotation() {
        let parameter = ParameterDescriptor::domain_event_message().annotated(
            ParameterAnnotation::MetaDataValue {
                key: "user".into(),
                required: true,
            },
        );
        let message = domain_event(MetaData::with("user", "alice"));

        let resolver = resolver(parameter);
        assert!(resolver.matches(&message));
        let value = resolver.resolve(&message);
        let resolved = value.as_message().expect("message value");
        assert_eq!(resolved.identifier(), message.identifier());
    }

    #[test]
    fn domain_message_parameter_does_not_match_plain_events() {
        let resolver = resolver(ParameterDescriptor::domain_event_message());
        let plain = GenericEventMessage::new(Payload::new(1u32)).into_ref();

        assert!(!resolver.matches(&plain));
        assert!(resolver.matches(&domain_event(MetaData::empty())));
    }

    #[test]
    fn optional_metadata_value_always_matches() {
        let resolver = resolver(ParameterDescriptor::meta_data_value("tenant", ValueKind::String));
        let message = domain_event(MetaData::empty());

        assert!(resolver.matches(&message));
        assert!(resolver.resolve(&message).as_value().is_none());
    }

    #[test]
    fn primitive_and_required_values_need_a_matching_entry() {
        let primitive = resolver(ParameterDescriptor::meta_data_value("retries", ValueKind::Integer).primitive());
        let required = resolver(ParameterDescriptor::meta_data_value("user", ValueKind::String).required());

        let missing = domain_event(MetaData::empty());
        let wrong_kind = domain_event(MetaData::with("retries", "three").and("user", 7));
        let present = domain_event(MetaData::with("retries", 3).and("user", "bob"));

        assert!(!primitive.matches(&missing));
        assert!(!primitive.matches(&wrong_kind));
        assert!(primitive.matches(&present));
        assert_eq!(primitive.resolve(&present).as_value(), Some(&json!(3)));

        assert!(!required.matches(&missing));
        assert!(!required.matches(&wrong_kind));
        assert!(required.matches(&present));
    }

    #[test]
    fn metadata_typed_parameter_gets_the_whole_map() {
        let resolver = resolver(ParameterDescriptor::meta_data());
        let message = domain_event(MetaData::with("a", 1).and("b", 2));

        let value = resolver.resolve(&message);
        assert_eq!(value.as_meta_data().map(MetaData::len), Some(2));
    }

    #[test]
    fn unrelated_parameters_are_left_to_other_factories() {
        assert!(
            DefaultParameterResolverFactory
                .create_instance(&[], &ParameterDescriptor::payload::<String>())
                .is_none()
        );
    }
}
