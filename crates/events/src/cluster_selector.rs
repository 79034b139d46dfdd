//! Strategies assigning event listeners to clusters.

use std::sync::Arc;

use keel_core::PayloadType;

use crate::cluster::{Cluster, SimpleCluster};
use crate::listener::EventListener;

/// Chooses the cluster a listener should join.
pub trait ClusterSelector: Send + Sync {
    /// `None` means this selector has no opinion about `listener`.
    fn select_cluster(&self, listener: &dyn EventListener) -> Option<Arc<dyn Cluster>>;
}

/// Puts every listener in the same cluster.
pub struct DefaultClusterSelector {
    cluster: Arc<dyn Cluster>,
}

impl DefaultClusterSelector {
    pub const DEFAULT_CLUSTER_NAME: &'static str = "default";

    pub fn new() -> Self {
        Self::with_cluster(Arc::new(SimpleCluster::new(Self::DEFAULT_CLUSTER_NAME)))
    }

    pub fn with_cluster(cluster: Arc<dyn Cluster>) -> Self {
        Self { cluster }
    }
}

impl Default for DefaultClusterSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterSelector for DefaultClusterSelector {
    fn select_cluster(&self, _listener: &dyn EventListener) -> Option<Arc<dyn Cluster>> {
        Some(self.cluster.clone())
    }
}

/// Selects a cluster for listeners whose type name starts with a prefix
/// (typically a module path such as `billing::`).
pub struct ListenerTypeClusterSelector {
    prefix: String,
    cluster: Arc<dyn Cluster>,
}

impl ListenerTypeClusterSelector {
    pub fn new(prefix: impl Into<String>, cluster: Arc<dyn Cluster>) -> Self {
        Self {
            prefix: prefix.into(),
            cluster,
        }
    }
}

impl ClusterSelector for ListenerTypeClusterSelector {
    fn select_cluster(&self, listener: &dyn EventListener) -> Option<Arc<dyn Cluster>> {
        listener
            .listener_type()
            .starts_with(&self.prefix)
            .then(|| self.cluster.clone())
    }
}

/// Selects a cluster for listeners tagged with marker type `M`, whatever
/// their type name.
pub struct MarkerClusterSelector {
    marker: PayloadType,
    cluster: Arc<dyn Cluster>,
}

impl MarkerClusterSelector {
    pub fn new<M: 'static>(cluster: Arc<dyn Cluster>) -> Self {
        Self {
            marker: PayloadType::of::<M>(),
            cluster,
        }
    }
}

impl ClusterSelector for MarkerClusterSelector {
    fn select_cluster(&self, listener: &dyn EventListener) -> Option<Arc<dyn Cluster>> {
        listener
            .markers()
            .contains(&self.marker)
            .then(|| self.cluster.clone())
    }
}

/// Asks each delegate in turn and returns the first selection.
pub struct CompositeClusterSelector {
    delegates: Vec<Box<dyn ClusterSelector>>,
}

impl CompositeClusterSelector {
    pub fn new(delegates: Vec<Box<dyn ClusterSelector>>) -> Self {
        Self { delegates }
    }
}

impl ClusterSelector for CompositeClusterSelector {
    fn select_cluster(&self, listener: &dyn EventListener) -> Option<Arc<dyn Cluster>> {
        self.delegates
            .iter()
            .find_map(|selector| selector.select_cluster(listener))
    }
}
