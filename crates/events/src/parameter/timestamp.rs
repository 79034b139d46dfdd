//! Resolvers for the message timestamp and the domain event sequence number.

use keel_core::{EventMessage, EventRef};

use crate::handler::MemberAnnotation;
use crate::parameter::descriptor::{
    ParameterAnnotation, ParameterDescriptor, ParameterType, ParameterValue,
};
use crate::parameter::resolver::{ParameterResolver, ParameterResolverFactory, Priority};

/// Resolves `Timestamp`-annotated timestamp parameters to the message timestamp.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampParameterResolverFactory;

impl ParameterResolverFactory for TimestampParameterResolverFactory {
    fn create_instance(
        &self,
        _member_annotations: &[MemberAnnotation],
        parameter: &ParameterDescriptor,
    ) -> Option<Box<dyn ParameterResolver>> {
        let applies = parameter.parameter_type == ParameterType::Timestamp
            && parameter.has_annotation(&ParameterAnnotation::Timestamp);
        applies.then(|| Box::new(TimestampParameterResolver) as Box<dyn ParameterResolver>)
    }

    fn priority(&self) -> Priority {
        Priority::HIGH
    }
}

#[derive(Debug)]
struct TimestampParameterResolver;

impl ParameterResolver for TimestampParameterResolver {
    fn resolve(&self, message: &EventRef) -> ParameterValue {
        ParameterValue::Timestamp(message.timestamp())
    }

    fn matches(&self, _message: &EventRef) -> bool {
        true
    }
}

/// Resolves `SequenceNumber`-annotated parameters for domain event messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceNumberParameterResolverFactory;

impl ParameterResolverFactory for SequenceNumberParameterResolverFactory {
    fn create_instance(
        &self,
        _member_annotations: &[MemberAnnotation],
        parameter: &ParameterDescriptor,
    ) -> Option<Box<dyn ParameterResolver>> {
        let applies = parameter.parameter_type == ParameterType::SequenceNumber
            && parameter.has_annotation(&ParameterAnnotation::SequenceNumber);
        applies.then(|| Box::new(SequenceNumberParameterResolver) as Box<dyn ParameterResolver>)
    }

    fn priority(&self) -> Priority {
        Priority::HIGH
    }
}

#[derive(Debug)]
struct SequenceNumberParameterResolver;

impl ParameterResolver for SequenceNumberParameterResolver {
    fn resolve(&self, message: &EventRef) -> ParameterValue {
        // Only reached after `matches`, so plain events never get here.
        ParameterValue::SequenceNumber(
            message
                .as_domain_event()
                .map(|event| event.sequence_number())
                .unwrap_or_default(),
        )
    }

    fn matches(&self, message: &EventRef) -> bool {
        message.as_domain_event().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::{DomainEventMessage, GenericEventMessage, MetaData, Payload};

    #[test]
    fn resolves_timestamp_when_annotated() {
        let resolver = TimestampParameterResolverFactory
            .create_instance(&[], &ParameterDescriptor::timestamp())
            .unwrap();
        let message = GenericEventMessage::new(Payload::new("test")).into_ref();

        assert!(resolver.matches(&message));
        assert_eq!(resolver.resolve(&message).as_timestamp(), Some(message.timestamp()));
    }

    #[test]
    fn ignored_when_not_annotated_or_wrong_type() {
        let unannotated = ParameterDescriptor::new(ParameterType::Timestamp);
        let wrong_type = ParameterDescriptor::payload::<String>().annotated(ParameterAnnotation::Timestamp);

        assert!(TimestampParameterResolverFactory.create_instance(&[], &unannotated).is_none());
        assert!(TimestampParameterResolverFactory.create_instance(&[], &wrong_type).is_none());
    }

    #[test]
    fn sequence_number_needs_a_domain_event() {
        let resolver = SequenceNumberParameterResolverFactory
            .create_instance(&[], &ParameterDescriptor::sequence_number())
            .unwrap();
        let domain = DomainEventMessage::new("a", 12, Payload::new(()), MetaData::empty()).into_ref();
        let plain = GenericEventMessage::new(Payload::new(())).into_ref();

        assert!(resolver.matches(&domain));
        assert_eq!(resolver.resolve(&domain).as_sequence_number(), Some(12));
        assert!(!resolver.matches(&plain));
    }
}
