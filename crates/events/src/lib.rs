//! `keel-events`: message handling mechanics.
//!
//! Parameter resolution and handler inspection, event listeners and their
//! processing monitors, clusters and the clustering event bus. Nothing in this
//! crate performs storage IO.

pub mod async_listener;
pub mod bus;
pub mod cluster;
pub mod cluster_selector;
pub mod command;
pub mod error;
pub mod handler;
pub mod listener;
pub mod monitor;
pub mod parameter;

pub use async_listener::AsyncEventListener;
pub use bus::{ClusteringEventBus, EventBus};
pub use cluster::{Cluster, ClusterMetaData, SimpleCluster};
pub use cluster_selector::{
    ClusterSelector, CompositeClusterSelector, DefaultClusterSelector, ListenerTypeClusterSelector,
    MarkerClusterSelector,
};
pub use command::Command;
pub use error::{
    EventBusError, HandlerError, ListenerError, MonitorError, ParameterError, ProcessingFailure,
};
pub use handler::{
    AnnotatedEventListener, AnnotatedHandlerInspector, EventHandlerDefinition, HandlerDefinition,
    HandlerInvoker, MemberAnnotation, MemberDescriptor, MessageHandlingMember,
};
pub use listener::{EventListener, FnEventListener};
pub use monitor::{
    EventProcessingMonitor, EventProcessingMonitorCollection, EventProcessingMonitorSupport,
    MultiplexingEventProcessingMonitor,
};
