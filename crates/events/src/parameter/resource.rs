//! Injection of fixed resources into handler parameters.

use std::any::Any;
use std::sync::Arc;

use keel_core::PayloadType;

use crate::handler::MemberAnnotation;
use crate::parameter::descriptor::{ParameterDescriptor, ParameterType, ParameterValue};
use crate::parameter::resolver::{
    FixedValueParameterResolver, ParameterResolver, ParameterResolverFactory, Priority,
};

/// Offers one resource instance to every parameter declared as a resource of
/// the same type.
#[derive(Clone)]
pub struct SimpleResourceParameterResolverFactory {
    resource: Arc<dyn Any + Send + Sync>,
    resource_type: PayloadType,
}

impl SimpleResourceParameterResolverFactory {
    pub fn new<T: Any + Send + Sync>(resource: T) -> Self {
        Self::from_arc(Arc::new(resource))
    }

    pub fn from_arc<T: Any + Send + Sync>(resource: Arc<T>) -> Self {
        Self {
            resource,
            resource_type: PayloadType::of::<T>(),
        }
    }

    pub fn resource_type(&self) -> PayloadType {
        self.resource_type
    }
}

impl std::fmt::Debug for SimpleResourceParameterResolverFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleResourceParameterResolverFactory")
            .field("resource_type", &self.resource_type.type_name())
            .finish()
    }
}

impl ParameterResolverFactory for SimpleResourceParameterResolverFactory {
    fn create_instance(
        &self,
        _member_annotations: &[MemberAnnotation],
        parameter: &ParameterDescriptor,
    ) -> Option<Box<dyn ParameterResolver>> {
        match parameter.parameter_type {
            ParameterType::Resource(requested) if requested == self.resource_type => Some(Box::new(
                FixedValueParameterResolver::new(ParameterValue::Resource(Arc::clone(&self.resource))),
            )),
            _ => None,
        }
    }

    fn priority(&self) -> Priority {
        Priority::LOW
    }
}
