//! Clusters: named groups of event listeners sharing a publication strategy.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use keel_core::{EventMessage, EventRef};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::error::ProcessingFailure;
use crate::listener::{EventListener, same_listener};
use crate::monitor::{
    EventProcessingMonitor, EventProcessingMonitorCollection, EventProcessingMonitorSupport,
    MultiplexingEventProcessingMonitor,
};

/// Mutable property map attached to a cluster (routing hints, deployment
/// information, ...).
#[derive(Debug, Default)]
pub struct ClusterMetaData {
    properties: RwLock<BTreeMap<String, JsonValue>>,
}

impl ClusterMetaData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property(&self, key: &str) -> Option<JsonValue> {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn set_property(&self, key: impl Into<String>, value: impl Into<JsonValue>) {
        self.properties
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    pub fn remove_property(&self, key: &str) -> Option<JsonValue> {
        self.properties
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    pub fn is_property_set(&self, key: &str) -> bool {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

/// A group of listeners that receive the same events.
///
/// Monitors subscribed to a cluster receive one terminal notification per
/// published event, after every member (including asynchronous ones) is done.
pub trait Cluster: EventProcessingMonitorSupport {
    fn name(&self) -> &str;

    fn publish(&self, events: &[EventRef]);

    fn subscribe(&self, listener: Arc<dyn EventListener>);

    fn unsubscribe(&self, listener: &Arc<dyn EventListener>);

    /// Current members, in subscription order.
    fn members(&self) -> Vec<Arc<dyn EventListener>>;

    fn meta_data(&self) -> &ClusterMetaData;
}

/// Invokes members one after another on the publishing thread.
///
/// Failures are isolated per listener: a failing member is logged and reported
/// through the monitors, and the remaining members still receive the event.
pub struct SimpleCluster {
    name: String,
    members: RwLock<Vec<Arc<dyn EventListener>>>,
    meta_data: ClusterMetaData,
    subscribed_monitors: Arc<EventProcessingMonitorCollection>,
    monitor: Arc<MultiplexingEventProcessingMonitor>,
}

impl SimpleCluster {
    pub fn new(name: impl Into<String>) -> Self {
        let subscribed_monitors = Arc::new(EventProcessingMonitorCollection::new());
        let monitor = Arc::new(MultiplexingEventProcessingMonitor::new(
            subscribed_monitors.clone(),
        ));
        Self {
            name: name.into(),
            members: RwLock::new(Vec::new()),
            meta_data: ClusterMetaData::new(),
            subscribed_monitors,
            monitor,
        }
    }

    fn monitor_handle(&self) -> Arc<dyn EventProcessingMonitor> {
        self.monitor.clone()
    }

    fn publish_one(&self, event: &EventRef, members: &[Arc<dyn EventListener>]) {
        self.monitor.prepare(event.as_ref());

        let mut failure: Option<ProcessingFailure> = None;
        for member in members {
            let asynchronous = match self.monitor.prepare_for_invocation(event.as_ref(), member.as_ref()) {
                Ok(()) => member.monitor_support().is_some(),
                Err(err) => {
                    warn!(cluster = %self.name, error = %err, "cannot track async invocation");
                    false
                }
            };

            if let Err(err) = member.handle(event) {
                warn!(
                    cluster = %self.name,
                    listener = member.listener_type(),
                    event_id = %event.identifier(),
                    error = %err,
                    "event listener failed"
                );
                let cause = ProcessingFailure::new(member.listener_type(), err);
                if asynchronous {
                    // The listener will never report for this event itself.
                    self.monitor
                        .on_event_processing_failed(std::slice::from_ref(event), &cause);
                } else {
                    failure = Some(cause);
                }
            }
        }

        match failure {
            Some(cause) => self
                .monitor
                .on_event_processing_failed(std::slice::from_ref(event), &cause),
            None => self
                .monitor
                .on_event_processing_completed(std::slice::from_ref(event)),
        }
    }
}

impl Cluster for SimpleCluster {
    fn name(&self) -> &str {
        &self.name
    }

    fn publish(&self, events: &[EventRef]) {
        let members = self.members();
        debug!(
            cluster = %self.name,
            event_count = events.len(),
            member_count = members.len(),
            "publishing events to cluster"
        );
        for event in events {
            self.publish_one(event, &members);
        }
    }

    fn subscribe(&self, listener: Arc<dyn EventListener>) {
        {
            let mut members = self.members.write().unwrap_or_else(PoisonError::into_inner);
            if members.iter().any(|m| same_listener(m, &listener)) {
                return;
            }
            members.push(listener.clone());
        }
        if let Some(support) = listener.monitor_support() {
            support.subscribe_event_processing_monitor(self.monitor_handle());
        }
    }

    fn unsubscribe(&self, listener: &Arc<dyn EventListener>) {
        self.members
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|m| !same_listener(m, listener));
        if let Some(support) = listener.monitor_support() {
            support.unsubscribe_event_processing_monitor(&self.monitor_handle());
        }
    }

    fn members(&self) -> Vec<Arc<dyn EventListener>> {
        self.members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn meta_data(&self) -> &ClusterMetaData {
        &self.meta_data
    }
}

impl EventProcessingMonitorSupport for SimpleCluster {
    fn subscribe_event_processing_monitor(&self, monitor: Arc<dyn EventProcessingMonitor>) {
        self.subscribed_monitors
            .subscribe_event_processing_monitor(monitor);
    }

    fn unsubscribe_event_processing_monitor(&self, monitor: &Arc<dyn EventProcessingMonitor>) {
        self.subscribed_monitors
            .unsubscribe_event_processing_monitor(monitor);
    }
}

impl std::fmt::Debug for SimpleCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleCluster")
            .field("name", &self.name)
            .field("members", &self.members().len())
            .field("meta_data", &self.meta_data)
            .finish_non_exhaustive()
    }
}
