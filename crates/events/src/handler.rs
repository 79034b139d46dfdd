//! Handler declarations, inspection and the annotated event listener.
//!
//! Handlers are declared as data: a [`MemberDescriptor`] names the handler,
//! lists its markers and parameters, and carries the function to invoke with
//! the resolved parameter values. Inspection turns descriptors into
//! [`MessageHandlingMember`]s once, so message dispatch never has to look at
//! declarations again.

use std::fmt;
use std::sync::Arc;

use keel_core::{EventMessage, EventRef, PayloadType};
use tracing::trace;

use crate::error::{HandlerError, ListenerError};
use crate::listener::EventListener;
use crate::parameter::{
    ParameterDescriptor, ParameterResolver, ParameterResolverFactory, ParameterType,
    ParameterValue, PayloadParameterResolver,
};

/// Marker attached to a handler member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberAnnotation {
    /// Marks an event handler. `payload_type` restricts the handled payload
    /// when the handler does not take the payload as its first parameter.
    EventHandler { payload_type: Option<PayloadType> },
    /// Application-defined marker, available to custom factories.
    Named(String),
}

pub type HandlerInvoker = Arc<dyn Fn(&[ParameterValue]) -> Result<(), ListenerError> + Send + Sync>;

/// Declaration of a candidate handler.
#[derive(Clone)]
pub struct MemberDescriptor {
    pub name: String,
    pub annotations: Vec<MemberAnnotation>,
    pub parameters: Vec<ParameterDescriptor>,
    invoker: HandlerInvoker,
}

impl MemberDescriptor {
    pub fn new<F>(name: impl Into<String>, invoker: F) -> Self
    where
        F: Fn(&[ParameterValue]) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            annotations: Vec::new(),
            parameters: Vec::new(),
            invoker: Arc::new(invoker),
        }
    }

    /// An event handler member.
    pub fn event_handler<F>(name: impl Into<String>, invoker: F) -> Self
    where
        F: Fn(&[ParameterValue]) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        Self::new(name, invoker).annotated(MemberAnnotation::EventHandler { payload_type: None })
    }

    pub fn annotated(mut self, annotation: MemberAnnotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn parameter(mut self, parameter: ParameterDescriptor) -> Self {
        self.parameters.push(parameter);
        self
    }
}

impl fmt::Debug for MemberDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberDescriptor")
            .field("name", &self.name)
            .field("annotations", &self.annotations)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

/// Decides which members are message handlers and what payload they handle.
pub trait HandlerDefinition: Send + Sync {
    fn is_message_handler(&self, member: &MemberDescriptor) -> bool;

    /// The explicitly declared payload type, if any.
    fn resolve_payload_for(&self, member: &MemberDescriptor) -> Option<PayloadType>;
}

/// Recognises members marked with [`MemberAnnotation::EventHandler`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EventHandlerDefinition;

impl HandlerDefinition for EventHandlerDefinition {
    fn is_message_handler(&self, member: &MemberDescriptor) -> bool {
        member
            .annotations
            .iter()
            .any(|a| matches!(a, MemberAnnotation::EventHandler { .. }))
    }

    fn resolve_payload_for(&self, member: &MemberDescriptor) -> Option<PayloadType> {
        member.annotations.iter().find_map(|a| match a {
            MemberAnnotation::EventHandler { payload_type } => *payload_type,
            _ => None,
        })
    }
}

/// An inspected handler, ready to be invoked.
pub struct MessageHandlingMember {
    name: String,
    /// `None` accepts any payload.
    payload_type: Option<PayloadType>,
    resolvers: Vec<Box<dyn ParameterResolver>>,
    invoker: HandlerInvoker,
}

impl MessageHandlingMember {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload_type(&self) -> Option<PayloadType> {
        self.payload_type
    }

    /// Whether the payload type fits and every parameter can be resolved.
    pub fn matches(&self, message: &EventRef) -> bool {
        let payload_fits = self
            .payload_type
            .is_none_or(|expected| message.payload().payload_type() == expected);
        payload_fits && self.resolvers.iter().all(|r| r.matches(message))
    }

    pub fn invoke(&self, message: &EventRef) -> Result<(), ListenerError> {
        let values: Vec<ParameterValue> = self.resolvers.iter().map(|r| r.resolve(message)).collect();
        (self.invoker)(&values)
    }
}

impl fmt::Debug for MessageHandlingMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageHandlingMember")
            .field("name", &self.name)
            .field("payload_type", &self.payload_type.map(|p| p.simple_name()))
            .field("resolvers", &self.resolvers)
            .finish_non_exhaustive()
    }
}

/// Builds [`MessageHandlingMember`]s from member declarations.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnotatedHandlerInspector;

impl AnnotatedHandlerInspector {
    /// Inspect `members`, keeping those `definition` recognises as handlers.
    ///
    /// Every parameter is offered to `factory`. A first parameter typed as
    /// `Payload` that no factory claims becomes the payload parameter; any
    /// other unresolvable parameter fails the whole inspection.
    pub fn inspect(
        members: Vec<MemberDescriptor>,
        definition: &dyn HandlerDefinition,
        factory: &dyn ParameterResolverFactory,
    ) -> Result<Vec<MessageHandlingMember>, HandlerError> {
        members
            .into_iter()
            .filter(|member| definition.is_message_handler(member))
            .map(|member| Self::inspect_member(member, definition, factory))
            .collect()
    }

    fn inspect_member(
        member: MemberDescriptor,
        definition: &dyn HandlerDefinition,
        factory: &dyn ParameterResolverFactory,
    ) -> Result<MessageHandlingMember, HandlerError> {
        let explicit = definition.resolve_payload_for(&member);
        let mut payload_type = explicit;
        let mut resolvers: Vec<Box<dyn ParameterResolver>> = Vec::with_capacity(member.parameters.len());

        for (index, parameter) in member.parameters.iter().enumerate() {
            if let Some(resolver) = factory.create_instance(&member.annotations, parameter) {
                resolvers.push(resolver);
                continue;
            }
            match parameter.parameter_type {
                ParameterType::Payload(declared) if index == 0 => {
                    if explicit.is_some_and(|explicit| explicit != declared) {
                        return Err(HandlerError::unsupported(
                            &member.name,
                            format!(
                                "declared payload type {} does not match parameter type {}",
                                explicit.map(|p| p.simple_name()).unwrap_or_default(),
                                declared.simple_name()
                            ),
                        ));
                    }
                    payload_type = Some(declared);
                    resolvers.push(Box::new(PayloadParameterResolver::new(declared)));
                }
                ref other => {
                    return Err(HandlerError::unsupported(
                        &member.name,
                        format!("parameter {index} of type {other:?} cannot be resolved"),
                    ));
                }
            }
        }

        Ok(MessageHandlingMember {
            name: member.name,
            payload_type,
            resolvers,
            invoker: member.invoker,
        })
    }
}

/// Event listener dispatching to inspected handler members.
///
/// For each event the first handler (in declaration order) that matches is
/// invoked. Events without a matching handler are ignored.
pub struct AnnotatedEventListener {
    listener_type: String,
    handlers: Vec<MessageHandlingMember>,
    markers: Vec<PayloadType>,
}

impl AnnotatedEventListener {
    pub fn new(
        listener_type: impl Into<String>,
        members: Vec<MemberDescriptor>,
        factory: &dyn ParameterResolverFactory,
    ) -> Result<Self, HandlerError> {
        Self::with_definition(listener_type, members, &EventHandlerDefinition, factory)
    }

    pub fn with_definition(
        listener_type: impl Into<String>,
        members: Vec<MemberDescriptor>,
        definition: &dyn HandlerDefinition,
        factory: &dyn ParameterResolverFactory,
    ) -> Result<Self, HandlerError> {
        Ok(Self {
            listener_type: listener_type.into(),
            handlers: AnnotatedHandlerInspector::inspect(members, definition, factory)?,
            markers: Vec::new(),
        })
    }

    /// Tags the listener with marker type `M` for cluster selection.
    pub fn with_marker<M: 'static>(mut self) -> Self {
        self.markers.push(PayloadType::of::<M>());
        self
    }

    pub fn handlers(&self) -> &[MessageHandlingMember] {
        &self.handlers
    }
}

impl EventListener for AnnotatedEventListener {
    fn handle(&self, event: &EventRef) -> Result<(), ListenerError> {
        match self.handlers.iter().find(|h| h.matches(event)) {
            Some(handler) => handler.invoke(event),
            None => {
                trace!(
                    listener = %self.listener_type,
                    payload_type = event.payload().payload_type().simple_name(),
                    "no matching handler"
                );
                Ok(())
            }
        }
    }

    fn listener_type(&self) -> &str {
        &self.listener_type
    }

    fn markers(&self) -> &[PayloadType] {
        &self.markers
    }
}

impl fmt::Debug for AnnotatedEventListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnotatedEventListener")
            .field("listener_type", &self.listener_type)
            .field("handlers", &self.handlers)
            .finish()
    }
}
