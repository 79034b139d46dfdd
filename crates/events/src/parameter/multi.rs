//! Composite parameter resolver factory.

use std::cmp::Reverse;
use std::sync::Arc;

use crate::handler::MemberAnnotation;
use crate::parameter::descriptor::ParameterDescriptor;
use crate::parameter::resolver::{ParameterResolver, ParameterResolverFactory, Priority};

/// Consults its delegates in order and returns the first resolver produced.
#[derive(Debug, Clone, Default)]
pub struct MultiParameterResolverFactory {
    delegates: Vec<Arc<dyn ParameterResolverFactory>>,
}

impl MultiParameterResolverFactory {
    /// Use `delegates` in the given order.
    pub fn new(delegates: Vec<Arc<dyn ParameterResolverFactory>>) -> Self {
        Self { delegates }
    }

    /// Inline the delegates of nested composites, then sort by descending
    /// priority. Factories with equal priority keep their relative order.
    pub fn ordered(delegates: Vec<Arc<dyn ParameterResolverFactory>>) -> Self {
        let mut flattened: Vec<Arc<dyn ParameterResolverFactory>> = Vec::with_capacity(delegates.len());
        for factory in delegates {
            match factory.as_multi() {
                Some(multi) => flattened.extend(multi.delegates.iter().cloned()),
                None => flattened.push(factory),
            }
        }
        flattened.sort_by_key(|factory| Reverse(factory.priority()));
        Self {
            delegates: flattened,
        }
    }

    /// Delegates in evaluation order.
    pub fn delegates(&self) -> &[Arc<dyn ParameterResolverFactory>] {
        &self.delegates
    }
}

impl ParameterResolverFactory for MultiParameterResolverFactory {
    fn create_instance(
        &self,
        member_annotations: &[MemberAnnotation],
        parameter: &ParameterDescriptor,
    ) -> Option<Box<dyn ParameterResolver>> {
        self.delegates
            .iter()
            .find_map(|factory| factory.create_instance(member_annotations, parameter))
    }

    fn priority(&self) -> Priority {
        self.delegates
            .first()
            .map(|factory| factory.priority())
            .unwrap_or_default()
    }

    fn as_multi(&self) -> Option<&MultiParameterResolverFactory> {
        Some(self)
    }
}
