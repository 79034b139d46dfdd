//! Criteria for store-wide event visits.
//!
//! Criteria are plain data so every backend can translate them: the in-memory
//! store evaluates [`EventCriteria::matches`], the Postgres store renders the
//! same bounds into a `WHERE` clause.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::backend::EventEntry;

/// One side of a timestamp range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampBound {
    Inclusive(DateTime<Utc>),
    Exclusive(DateTime<Utc>),
}

impl TimestampBound {
    pub fn instant(&self) -> DateTime<Utc> {
        match self {
            TimestampBound::Inclusive(t) | TimestampBound::Exclusive(t) => *t,
        }
    }

    pub fn is_inclusive(&self) -> bool {
        matches!(self, TimestampBound::Inclusive(_))
    }
}

/// Filter for [`visit_events`](super::EventStoreManagement::visit_events).
///
/// The default criteria match every event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCriteria {
    pub from: Option<TimestampBound>,
    pub to: Option<TimestampBound>,
    pub aggregate_type: Option<String>,
}

impl EventCriteria {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn after(mut self, timestamp: DateTime<Utc>) -> Self {
        self.from = Some(TimestampBound::Exclusive(timestamp));
        self
    }

    pub fn on_or_after(mut self, timestamp: DateTime<Utc>) -> Self {
        self.from = Some(TimestampBound::Inclusive(timestamp));
        self
    }

    pub fn before(mut self, timestamp: DateTime<Utc>) -> Self {
        self.to = Some(TimestampBound::Exclusive(timestamp));
        self
    }

    pub fn on_or_before(mut self, timestamp: DateTime<Utc>) -> Self {
        self.to = Some(TimestampBound::Inclusive(timestamp));
        self
    }

    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    pub fn matches(&self, entry: &EventEntry) -> bool {
        let after_from = match self.from {
            Some(TimestampBound::Inclusive(t)) => entry.timestamp >= t,
            Some(TimestampBound::Exclusive(t)) => entry.timestamp > t,
            None => true,
        };
        let before_to = match self.to {
            Some(TimestampBound::Inclusive(t)) => entry.timestamp <= t,
            Some(TimestampBound::Exclusive(t)) => entry.timestamp < t,
            None => true,
        };
        let same_type = self
            .aggregate_type
            .as_deref()
            .is_none_or(|t| t == entry.aggregate_type);

        after_from && before_to && same_type
    }
}
