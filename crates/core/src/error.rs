//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts) and on structural problems with how an aggregate type
/// is declared. Storage concerns belong to the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The aggregate type is declared in a way the framework cannot work with
    /// (missing identifier, identity assigned too late, ...).
    ///
    /// This is a configuration error: it is fatal for the aggregate type and
    /// must not be retried.
    #[error("incompatible aggregate: {0}")]
    IncompatibleAggregate(String),

    /// A piece of aggregate state could not be accessed.
    #[error("inaccessible aggregate state: {0}")]
    Inaccessible(String),

    /// Reading an event stream failed part way through.
    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn incompatible(msg: impl Into<String>) -> Self {
        Self::IncompatibleAggregate(msg.into())
    }

    pub fn inaccessible(msg: impl Into<String>) -> Self {
        Self::Inaccessible(msg.into())
    }
}

/// Failure surfaced while iterating a [`DomainEventStream`](crate::DomainEventStream).
///
/// Streams are lazy, so storage or decoding problems can appear after the
/// stream was handed out. The producer describes the failure as text; the
/// consumer decides whether to abort.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("event stream failure: {0}")]
pub struct StreamError(pub String);

impl StreamError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}
