//! Positions in the store-wide event order.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::message::DomainEventMessage;

/// A position marker for sequential consumption of the global event stream.
///
/// Tokens are opaque to consumers: they are handed out with tracked events and
/// handed back to resume reading after that event.
pub trait TrackingToken: fmt::Debug + Send + Sync {
    /// Whether everything up to and including `other` has been seen by a
    /// consumer holding `self`.
    fn covers(&self, other: &Self) -> bool;
}

/// Tracking token backed by the store's global insertion index.
///
/// Indices are assigned on append and increase monotonically; they may have
/// gaps (e.g. after a failed transaction) but never repeat.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalIndexToken(u64);

impl GlobalIndexToken {
    pub fn new(global_index: u64) -> Self {
        Self(global_index)
    }

    pub fn global_index(&self) -> u64 {
        self.0
    }
}

impl TrackingToken for GlobalIndexToken {
    fn covers(&self, other: &Self) -> bool {
        self.0 >= other.0
    }
}

impl fmt::Display for GlobalIndexToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A domain event together with its position in the global stream.
#[derive(Debug, Clone)]
pub struct TrackedDomainEvent {
    pub token: GlobalIndexToken,
    pub aggregate_type: String,
    pub event: DomainEventMessage,
}
