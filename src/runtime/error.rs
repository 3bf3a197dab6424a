//! Error types for the runtime
//!
//! Two kinds of failure live here and they are deliberately different shapes.
//! Host-level faults (bad configuration, a dead channel, an unknown endpoint)
//! are ordinary Rust errors built with thiserror. Program-level exceptions
//! raised while executing a tree are data: an [`Exception`] travels through
//! the stack's pending-exception slot so a `catch` element can consume it,
//! and only becomes a terminal status if nothing does.

use crate::atom::Atom;
use crate::value::Value;
use std::fmt;
use thiserror::Error;

/// An exception raised by program execution.
///
/// The category is an interned atom so handler matching is an identity
/// comparison. Message and data are optional diagnostics carried to whoever
/// consumes the exception (a `catch` frame or the curator).
#[derive(Debug, Clone)]
pub struct Exception {
    /// Interned category name, e.g. `badValue`.
    pub category: Atom,
    /// Human-readable detail.
    pub message: Option<String>,
    /// Structured payload attached at the raise site.
    pub data: Option<Value>,
}

impl Exception {
    /// Build an exception with a message.
    pub fn new(category: Atom, message: impl Into<String>) -> Self {
        Exception {
            category,
            message: Some(message.into()),
            data: None,
        }
    }

    /// Build an exception with no diagnostics.
    pub fn bare(category: Atom) -> Self {
        Exception {
            category,
            message: None,
            data: None,
        }
    }

    /// Attach a structured payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// A value that does not fit where it was used.
    pub fn bad_value(message: impl Into<String>) -> Self {
        Exception::new(Atom::intern("badValue"), message)
    }

    /// A well-typed value outside its permitted range.
    pub fn invalid_value(message: impl Into<String>) -> Self {
        Exception::new(Atom::intern("invalidValue"), message)
    }

    /// A name or key that already exists.
    pub fn duplicated(message: impl Into<String>) -> Self {
        Exception::new(Atom::intern("duplicated"), message)
    }

    /// A feature that is recognized but not available.
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Exception::new(Atom::intern("notImplemented"), message)
    }

    /// A referenced entity that does not exist.
    pub fn entity_not_found(message: impl Into<String>) -> Self {
        Exception::new(Atom::intern("entityNotFound"), message)
    }

    /// Resource exhaustion (stack depth, allocation).
    pub fn memory_failure(message: impl Into<String>) -> Self {
        Exception::new(Atom::intern("memoryFailure"), message)
    }

    /// A program that produced nothing.
    pub fn no_data(message: impl Into<String>) -> Self {
        Exception::new(Atom::intern("noData"), message)
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {}", self.category, msg),
            None => write!(f, "{}", self.category),
        }
    }
}

/// Faults in runtime setup and lifecycle.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid configuration or identifier.
    #[error("configuration error: {0}")]
    Config(String),

    /// An instance thread failed to start.
    #[error("instance failed to start: {0}")]
    InstanceStart(String),
}

/// Faults in inter-instance messaging.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A request arrived without a field its operation requires.
    #[error("request is missing required field: {0}")]
    MissingField(&'static str),

    /// The operation string was not recognized.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// No instance is registered at the endpoint.
    #[error("no instance at endpoint: {0}")]
    InstanceNotFound(String),

    /// The addressed coroutine does not exist.
    #[error("coroutine not found: {0}")]
    CoroutineNotFound(u64),

    /// The peer's channel is gone.
    #[error("channel closed")]
    ChannelClosed,

    /// The peer answered with a bad-request status.
    #[error("request rejected: {0}")]
    BadRequest(String),
}

/// Result alias for runtime lifecycle operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Result alias for messaging operations.
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_intern_to_stable_atoms() {
        let a = Exception::bad_value("x");
        let b = Exception::bad_value("y");
        assert_eq!(a.category, b.category);
        assert_eq!(a.category.as_str(), "badValue");
    }

    #[test]
    fn display_includes_message() {
        let e = Exception::invalid_value("sleep interval must be positive");
        assert_eq!(
            e.to_string(),
            "invalidValue: sleep interval must be positive"
        );
        assert_eq!(Exception::bare(Atom::intern("noData")).to_string(), "noData");
    }
}
