//! Event publishing/subscription abstraction (mechanics only).
//!
//! The event bus distributes events to listeners **after** they have been
//! persisted. The event store is the source of truth; the bus is transport.
//!
//! ## Delivery
//!
//! - Events are delivered in publication order to each cluster.
//! - A failing listener never prevents delivery to other listeners; failures
//!   are reported through the clusters' event processing monitors.
//! - There is no persistence: if the process stops between append and
//!   publication, consumers must catch up from the store (see tracking tokens).

use std::sync::{Arc, PoisonError, RwLock};

use keel_core::EventRef;
use tracing::{debug, info};

use crate::cluster::Cluster;
use crate::cluster_selector::ClusterSelector;
use crate::error::EventBusError;
use crate::listener::EventListener;

/// Domain-agnostic event bus.
///
/// The trait requires `Send + Sync`, meaning implementations must be safe to
/// share across threads. Multiple threads can publish events concurrently.
pub trait EventBus: Send + Sync {
    fn publish(&self, events: &[EventRef]) -> Result<(), EventBusError>;

    fn subscribe(&self, listener: Arc<dyn EventListener>) -> Result<(), EventBusError>;

    fn unsubscribe(&self, listener: &Arc<dyn EventListener>);
}

impl<B> EventBus for Arc<B>
where
    B: EventBus + ?Sized,
{
    fn publish(&self, events: &[EventRef]) -> Result<(), EventBusError> {
        (**self).publish(events)
    }

    fn subscribe(&self, listener: Arc<dyn EventListener>) -> Result<(), EventBusError> {
        (**self).subscribe(listener)
    }

    fn unsubscribe(&self, listener: &Arc<dyn EventListener>) {
        (**self).unsubscribe(listener)
    }
}

/// Event bus that groups listeners into clusters chosen by a
/// [`ClusterSelector`] and publishes every event to every cluster.
pub struct ClusteringEventBus {
    selector: Box<dyn ClusterSelector>,
    clusters: RwLock<Vec<Arc<dyn Cluster>>>,
}

impl ClusteringEventBus {
    pub fn new(selector: impl ClusterSelector + 'static) -> Self {
        Self {
            selector: Box::new(selector),
            clusters: RwLock::new(Vec::new()),
        }
    }

    /// Clusters that received at least one listener, in order of first use.
    pub fn clusters(&self) -> Vec<Arc<dyn Cluster>> {
        self.clusters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for ClusteringEventBus {
    fn default() -> Self {
        Self::new(crate::cluster_selector::DefaultClusterSelector::new())
    }
}

fn same_cluster(a: &Arc<dyn Cluster>, b: &Arc<dyn Cluster>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl EventBus for ClusteringEventBus {
    fn publish(&self, events: &[EventRef]) -> Result<(), EventBusError> {
        if events.is_empty() {
            return Ok(());
        }
        let clusters = self.clusters();
        debug!(
            event_count = events.len(),
            cluster_count = clusters.len(),
            "publishing events"
        );
        for cluster in clusters {
            cluster.publish(events);
        }
        Ok(())
    }

    fn subscribe(&self, listener: Arc<dyn EventListener>) -> Result<(), EventBusError> {
        let cluster = self
            .selector
            .select_cluster(listener.as_ref())
            .ok_or_else(|| EventBusError::NoClusterSelected(listener.listener_type().to_string()))?;

        {
            let mut clusters = self.clusters.write().map_err(|_| EventBusError::Poisoned)?;
            if !clusters.iter().any(|c| same_cluster(c, &cluster)) {
                info!(cluster = cluster.name(), "registering cluster");
                clusters.push(cluster.clone());
            }
        }

        cluster.subscribe(listener);
        Ok(())
    }

    fn unsubscribe(&self, listener: &Arc<dyn EventListener>) {
        if let Some(cluster) = self.selector.select_cluster(listener.as_ref()) {
            cluster.unsubscribe(listener);
        }
    }
}
