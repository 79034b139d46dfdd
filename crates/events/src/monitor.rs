//! Event processing monitors.
//!
//! A monitor is told when processing of a batch of events completed or
//! failed. Clusters use a [`MultiplexingEventProcessingMonitor`] to merge the
//! synchronous outcome of a publication with the out-of-band outcomes of
//! asynchronous listeners into a single terminal notification per event.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use dashmap::DashMap;
use keel_core::{EventId, EventMessage, EventRef};

use crate::error::{MonitorError, ProcessingFailure};
use crate::listener::EventListener;

/// Receives processing outcomes.
pub trait EventProcessingMonitor: Send + Sync {
    fn on_event_processing_completed(&self, events: &[EventRef]);

    fn on_event_processing_failed(&self, events: &[EventRef], cause: &ProcessingFailure);
}

/// Implemented by components that report processing outcomes to subscribed
/// monitors.
pub trait EventProcessingMonitorSupport: Send + Sync {
    fn subscribe_event_processing_monitor(&self, monitor: Arc<dyn EventProcessingMonitor>);

    fn unsubscribe_event_processing_monitor(&self, monitor: &Arc<dyn EventProcessingMonitor>);
}

fn same_monitor(a: &Arc<dyn EventProcessingMonitor>, b: &Arc<dyn EventProcessingMonitor>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Fans every notification out to the subscribed monitors.
#[derive(Default)]
pub struct EventProcessingMonitorCollection {
    monitors: RwLock<Vec<Arc<dyn EventProcessingMonitor>>>,
}

impl EventProcessingMonitorCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Notify outside the lock so monitors may (un)subscribe re-entrantly.
    fn snapshot(&self) -> Vec<Arc<dyn EventProcessingMonitor>> {
        self.monitors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventProcessingMonitorSupport for EventProcessingMonitorCollection {
    fn subscribe_event_processing_monitor(&self, monitor: Arc<dyn EventProcessingMonitor>) {
        let mut monitors = self.monitors.write().unwrap_or_else(PoisonError::into_inner);
        if !monitors.iter().any(|m| same_monitor(m, &monitor)) {
            monitors.push(monitor);
        }
    }

    fn unsubscribe_event_processing_monitor(&self, monitor: &Arc<dyn EventProcessingMonitor>) {
        self.monitors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|m| !same_monitor(m, monitor));
    }
}

impl EventProcessingMonitor for EventProcessingMonitorCollection {
    fn on_event_processing_completed(&self, events: &[EventRef]) {
        for monitor in self.snapshot() {
            monitor.on_event_processing_completed(events);
        }
    }

    fn on_event_processing_failed(&self, events: &[EventRef], cause: &ProcessingFailure) {
        for monitor in self.snapshot() {
            monitor.on_event_processing_failed(events, cause);
        }
    }
}

/// Outstanding acknowledgements for one event.
#[derive(Debug)]
struct Counter {
    pending: AtomicUsize,
    failure: Mutex<Option<ProcessingFailure>>,
}

impl Counter {
    fn new() -> Self {
        Self {
            pending: AtomicUsize::new(1),
            failure: Mutex::new(None),
        }
    }

    fn expect_async_invocation(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns true when this was the last outstanding acknowledgement.
    fn record_success(&self) -> bool {
        self.pending.fetch_sub(1, Ordering::AcqRel) == 1
    }

    fn record_failure(&self, cause: &ProcessingFailure) -> bool {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(cause.clone());
        self.pending.fetch_sub(1, Ordering::AcqRel) == 1
    }

    fn failure(&self) -> Option<ProcessingFailure> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Collects the acknowledgements for each prepared event and notifies the
/// target exactly once per event.
///
/// ## Lifecycle of an event
///
/// 1. [`prepare`](Self::prepare) expects one acknowledgement (the publishing
///    cluster's own).
/// 2. [`prepare_for_invocation`](Self::prepare_for_invocation) expects one more
///    for every listener that reports asynchronously.
/// 3. Each completion or failure consumes one acknowledgement. When none are
///    left the target is told about success, or about failure with the last
///    recorded cause if any acknowledgement was a failure.
///
/// Events that were never prepared are passed straight to the target.
pub struct MultiplexingEventProcessingMonitor {
    counters: DashMap<EventId, Arc<Counter>>,
    target: Arc<dyn EventProcessingMonitor>,
}

impl MultiplexingEventProcessingMonitor {
    pub fn new(target: Arc<dyn EventProcessingMonitor>) -> Self {
        Self {
            counters: DashMap::new(),
            target,
        }
    }

    pub fn prepare(&self, event: &dyn EventMessage) {
        self.counters
            .insert(event.identifier(), Arc::new(Counter::new()));
    }

    /// Must be called before `listener` is invoked with `event`.
    pub fn prepare_for_invocation(
        &self,
        event: &dyn EventMessage,
        listener: &dyn EventListener,
    ) -> Result<(), MonitorError> {
        if listener.monitor_support().is_none() {
            return Ok(());
        }
        let counter = self
            .counter(&event.identifier())
            .ok_or(MonitorError::NotPrepared(event.identifier()))?;
        counter.expect_async_invocation();
        Ok(())
    }

    /// Number of events still awaiting acknowledgements.
    pub fn in_flight(&self) -> usize {
        self.counters.len()
    }

    // Clone the counter out so no map guard is held while notifying.
    fn counter(&self, id: &EventId) -> Option<Arc<Counter>> {
        self.counters.get(id).map(|entry| Arc::clone(entry.value()))
    }

    fn release(&self, id: &EventId, counter: &Arc<Counter>) {
        self.counters
            .remove_if(id, |_, current| Arc::ptr_eq(current, counter));
    }
}

impl EventProcessingMonitor for MultiplexingEventProcessingMonitor {
    fn on_event_processing_completed(&self, events: &[EventRef]) {
        let mut acknowledged = Vec::with_capacity(events.len());
        for event in events {
            let id = event.identifier();
            match self.counter(&id) {
                None => acknowledged.push(event.clone()),
                Some(counter) => {
                    if !counter.record_success() {
                        continue;
                    }
                    self.release(&id, &counter);
                    match counter.failure() {
                        Some(cause) => self
                            .target
                            .on_event_processing_failed(std::slice::from_ref(event), &cause),
                        None => acknowledged.push(event.clone()),
                    }
                }
            }
        }
        if !acknowledged.is_empty() {
            self.target.on_event_processing_completed(&acknowledged);
        }
    }

    fn on_event_processing_failed(&self, events: &[EventRef], cause: &ProcessingFailure) {
        let mut failed = Vec::with_capacity(events.len());
        for event in events {
            let id = event.identifier();
            match self.counter(&id) {
                None => failed.push(event.clone()),
                Some(counter) => {
                    if counter.record_failure(cause) {
                        self.release(&id, &counter);
                        failed.push(event.clone());
                    }
                }
            }
        }
        if !failed.is_empty() {
            self.target.on_event_processing_failed(&failed, cause);
        }
    }
}

impl std::fmt::Debug for MultiplexingEventProcessingMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiplexingEventProcessingMonitor")
            .field("in_flight", &self.counters.len())
            .finish_non_exhaustive()
    }
}

/// Test helper recording every notification it receives.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingMonitor {
    pub(crate) completed: Mutex<Vec<EventId>>,
    pub(crate) failed: Mutex<Vec<(EventId, ProcessingFailure)>>,
}

#[cfg(test)]
impl RecordingMonitor {
    pub(crate) fn completed(&self) -> Vec<EventId> {
        self.completed.lock().unwrap().clone()
    }

    pub(crate) fn failed(&self) -> Vec<(EventId, ProcessingFailure)> {
        self.failed.lock().unwrap().clone()
    }

    pub(crate) fn terminal_count(&self) -> usize {
        self.completed().len() + self.failed().len()
    }
}

#[cfg(test)]
impl EventProcessingMonitor for RecordingMonitor {
    fn on_event_processing_completed(&self, events: &[EventRef]) {
        self.completed
            .lock()
            .unwrap()
            .extend(events.iter().map(|e| e.identifier()));
    }

    fn on_event_processing_failed(&self, events: &[EventRef], cause: &ProcessingFailure) {
        self.failed
            .lock()
            .unwrap()
            .extend(events.iter().map(|e| (e.identifier(), cause.clone())));
    }
}
