//! Resolver and factory abstractions.

use std::fmt;
use std::sync::Arc;

use keel_core::EventRef;

use crate::handler::MemberAnnotation;
use crate::parameter::descriptor::{ParameterDescriptor, ParameterValue};
use crate::parameter::multi::MultiParameterResolverFactory;

/// Resolves the value of one handler parameter from an incoming message.
pub trait ParameterResolver: fmt::Debug + Send + Sync {
    fn resolve(&self, message: &EventRef) -> ParameterValue;

    /// Whether this resolver can provide a value for `message`. A handler is
    /// only invoked when all of its resolvers match.
    fn matches(&self, message: &EventRef) -> bool;
}

/// Ordering weight of a factory inside a [`MultiParameterResolverFactory`];
/// higher priorities are consulted first.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub i32);

impl Priority {
    pub const FIRST: Priority = Priority(i32::MAX);
    pub const HIGH: Priority = Priority(i32::MAX / 2);
    pub const NEUTRAL: Priority = Priority(0);
    pub const LOW: Priority = Priority(i32::MIN / 2);
    pub const LAST: Priority = Priority(i32::MIN);
}

impl Default for Priority {
    fn default() -> Self {
        Priority::NEUTRAL
    }
}

/// Creates resolvers for the parameters a factory knows how to satisfy.
pub trait ParameterResolverFactory: fmt::Debug + Send + Sync {
    /// A resolver for `parameter`, or `None` if this factory does not apply.
    fn create_instance(
        &self,
        member_annotations: &[MemberAnnotation],
        parameter: &ParameterDescriptor,
    ) -> Option<Box<dyn ParameterResolver>>;

    fn priority(&self) -> Priority {
        Priority::NEUTRAL
    }

    /// The composite view of this factory, used to flatten nested composites.
    fn as_multi(&self) -> Option<&MultiParameterResolverFactory> {
        None
    }
}

impl<F: ParameterResolverFactory + ?Sized> ParameterResolverFactory for Arc<F> {
    fn create_instance(
        &self,
        member_annotations: &[MemberAnnotation],
        parameter: &ParameterDescriptor,
    ) -> Option<Box<dyn ParameterResolver>> {
        (**self).create_instance(member_annotations, parameter)
    }

    fn priority(&self) -> Priority {
        (**self).priority()
    }

    fn as_multi(&self) -> Option<&MultiParameterResolverFactory> {
        (**self).as_multi()
    }
}

/// Always resolves to the same value.
#[derive(Debug, Clone)]
pub struct FixedValueParameterResolver {
    value: ParameterValue,
}

impl FixedValueParameterResolver {
    pub fn new(value: ParameterValue) -> Self {
        Self { value }
    }
}

impl ParameterResolver for FixedValueParameterResolver {
    fn resolve(&self, _message: &EventRef) -> ParameterValue {
        self.value.clone()
    }

    fn matches(&self, _message: &EventRef) -> bool {
        true
    }
}
