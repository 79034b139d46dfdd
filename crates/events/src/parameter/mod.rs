//! Handler parameter resolution.
//!
//! A handler declares its parameters statically ([`ParameterDescriptor`]).
//! When the handler is inspected, every parameter is offered to a chain of
//! [`ParameterResolverFactory`]s; the first factory that recognises it returns
//! a [`ParameterResolver`], which later extracts the concrete value from each
//! incoming message.
//!
//! Factories are chained through [`MultiParameterResolverFactory::ordered`],
//! highest [`Priority`] first.

mod default;
mod descriptor;
mod multi;
mod resolver;
mod resource;
mod timestamp;

pub use default::{DefaultParameterResolverFactory, PayloadParameterResolver};
pub use descriptor::{ParameterAnnotation, ParameterDescriptor, ParameterType, ParameterValue, ValueKind};
pub use multi::MultiParameterResolverFactory;
pub use resolver::{FixedValueParameterResolver, ParameterResolver, ParameterResolverFactory, Priority};
pub use resource::SimpleResourceParameterResolverFactory;
pub use timestamp::{SequenceNumberParameterResolverFactory, TimestampParameterResolverFactory};

use std::sync::Arc;

/// The factory chain containing every built-in factory.
pub fn default_factories() -> MultiParameterResolverFactory {
    MultiParameterResolverFactory::ordered(vec![
        Arc::new(DefaultParameterResolverFactory),
        Arc::new(TimestampParameterResolverFactory),
        Arc::new(SequenceNumberParameterResolverFactory),
    ])
}
