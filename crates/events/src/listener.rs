//! Event listener abstraction.

use std::sync::Arc;

use keel_core::{EventRef, PayloadType};

use crate::error::ListenerError;
use crate::monitor::EventProcessingMonitorSupport;

/// Receives published events.
///
/// ## Synchronous vs asynchronous listeners
///
/// By default a listener processes an event inside `handle` and the outcome
/// is the returned `Result`. Listeners that finish processing later (on
/// another thread) expose [`monitor_support`](EventListener::monitor_support):
/// their clusters then subscribe a monitor to them and wait for the
/// out-of-band completion signal before acknowledging the event.
pub trait EventListener: Send + Sync {
    fn handle(&self, event: &EventRef) -> Result<(), ListenerError>;

    /// A name identifying the kind of listener, used by cluster selectors and
    /// in diagnostics.
    fn listener_type(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Monitor registration, for listeners that report completion
    /// asynchronously.
    fn monitor_support(&self) -> Option<&dyn EventProcessingMonitorSupport> {
        None
    }

    /// Marker types the listener carries, see
    /// [`MarkerClusterSelector`](crate::cluster_selector::MarkerClusterSelector).
    fn markers(&self) -> &[PayloadType] {
        &[]
    }
}

impl<L: EventListener + ?Sized> EventListener for Arc<L> {
    fn handle(&self, event: &EventRef) -> Result<(), ListenerError> {
        (**self).handle(event)
    }

    fn listener_type(&self) -> &str {
        (**self).listener_type()
    }

    fn monitor_support(&self) -> Option<&dyn EventProcessingMonitorSupport> {
        (**self).monitor_support()
    }

    fn markers(&self) -> &[PayloadType] {
        (**self).markers()
    }
}

/// Identity comparison for shared listeners.
pub(crate) fn same_listener(a: &Arc<dyn EventListener>, b: &Arc<dyn EventListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Adapts a closure into an [`EventListener`].
pub struct FnEventListener<F> {
    name: String,
    handler: F,
    markers: Vec<PayloadType>,
}

impl<F> FnEventListener<F>
where
    F: Fn(&EventRef) -> Result<(), ListenerError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
            markers: Vec::new(),
        }
    }

    pub fn with_marker<M: 'static>(mut self) -> Self {
        self.markers.push(PayloadType::of::<M>());
        self
    }
}

impl<F> EventListener for FnEventListener<F>
where
    F: Fn(&EventRef) -> Result<(), ListenerError> + Send + Sync,
{
    fn handle(&self, event: &EventRef) -> Result<(), ListenerError> {
        (self.handler)(event)
    }

    fn listener_type(&self) -> &str {
        &self.name
    }

    fn markers(&self) -> &[PayloadType] {
        &self.markers
    }
}
