//! Listener that processes events on a dedicated worker thread.

use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use keel_core::{EventMessage, EventRef, PayloadType};
use tracing::{debug, warn};

use crate::error::{ListenerError, ProcessingFailure};
use crate::listener::EventListener;
use crate::monitor::{
    EventProcessingMonitor, EventProcessingMonitorCollection, EventProcessingMonitorSupport,
};

/// Hands events to a worker thread and reports the outcome of each one to the
/// subscribed monitors once the wrapped listener has run.
///
/// `handle` only enqueues: it returns `Ok` as soon as the event is accepted.
/// Dropping the listener closes the queue and waits for the worker to drain it.
pub struct AsyncEventListener {
    listener_type: String,
    sender: Option<Sender<EventRef>>,
    worker: Option<JoinHandle<()>>,
    monitors: Arc<EventProcessingMonitorCollection>,
    markers: Vec<PayloadType>,
}

impl AsyncEventListener {
    pub fn new(delegate: Arc<dyn EventListener>) -> Result<Self, ListenerError> {
        let listener_type = delegate.listener_type().to_string();
        let markers = delegate.markers().to_vec();
        let monitors = Arc::new(EventProcessingMonitorCollection::new());
        let (sender, receiver) = mpsc::channel::<EventRef>();

        let worker_monitors = Arc::clone(&monitors);
        let worker_type = listener_type.clone();
        let worker = thread::Builder::new()
            .name(format!("keel-async-{}", simple_name(&listener_type)))
            .spawn(move || {
                for event in receiver {
                    match delegate.handle(&event) {
                        Ok(()) => worker_monitors.on_event_processing_completed(&[event]),
                        Err(err) => {
                            warn!(
                                listener = %worker_type,
                                event_id = %event.identifier(),
                                error = %err,
                                "async event listener failed"
                            );
                            let failure = ProcessingFailure::new(worker_type.clone(), err);
                            worker_monitors.on_event_processing_failed(&[event], &failure);
                        }
                    }
                }
                debug!(listener = %worker_type, "async event listener worker stopped");
            })
            .map_err(|e| ListenerError::Unavailable(format!("cannot start worker: {e}")))?;

        Ok(Self {
            listener_type,
            sender: Some(sender),
            worker: Some(worker),
            monitors,
            markers,
        })
    }
}

fn simple_name(listener_type: &str) -> &str {
    listener_type.rsplit("::").next().unwrap_or(listener_type)
}

impl EventListener for AsyncEventListener {
    fn handle(&self, event: &EventRef) -> Result<(), ListenerError> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| ListenerError::Unavailable(self.listener_type.clone()))?;
        sender
            .send(Arc::clone(event))
            .map_err(|_| ListenerError::Unavailable(self.listener_type.clone()))
    }

    fn listener_type(&self) -> &str {
        &self.listener_type
    }

    fn monitor_support(&self) -> Option<&dyn EventProcessingMonitorSupport> {
        Some(self.monitors.as_ref())
    }

    fn markers(&self) -> &[PayloadType] {
        &self.markers
    }
}

impl Drop for AsyncEventListener {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(listener = %self.listener_type, "async event listener worker panicked");
            }
        }
    }
}
