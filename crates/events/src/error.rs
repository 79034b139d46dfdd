//! Error types for message handling.

use thiserror::Error;

use keel_core::EventId;

/// A resolved parameter value did not have the shape the handler expected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParameterError {
    #[error("handler parameter {index} is missing")]
    Missing { index: usize },

    #[error("handler parameter {index} is not a {expected}")]
    Mismatch { index: usize, expected: &'static str },
}

/// A handler declaration that cannot be turned into an invocable handler.
///
/// This is a configuration error and is reported when the handler is
/// inspected, never while handling messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("unsupported handler {member}: {reason}")]
    UnsupportedHandler { member: String, reason: String },
}

impl HandlerError {
    pub fn unsupported(member: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedHandler {
            member: member.into(),
            reason: reason.into(),
        }
    }
}

/// Failure of a single event listener.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ListenerError {
    /// The listener rejected or failed to process the event.
    #[error("listener failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Parameter(#[from] ParameterError),

    /// The listener cannot accept events anymore (e.g. its worker stopped).
    #[error("listener unavailable: {0}")]
    Unavailable(String),
}

impl ListenerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Cause reported to monitors when processing of an event failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{listener}: {cause}")]
pub struct ProcessingFailure {
    /// Type of the listener that failed.
    pub listener: String,
    pub cause: ListenerError,
}

impl ProcessingFailure {
    pub fn new(listener: impl Into<String>, cause: ListenerError) -> Self {
        Self {
            listener: listener.into(),
            cause,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MonitorError {
    /// An asynchronous invocation was registered for an event that was never
    /// prepared.
    #[error("event {0} must be prepared before registering async invocations")]
    NotPrepared(EventId),
}

/// Failure to route listeners or events through an event bus.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventBusError {
    #[error("no cluster selected for listener {0}")]
    NoClusterSelected(String),

    #[error("event bus state poisoned")]
    Poisoned,
}
