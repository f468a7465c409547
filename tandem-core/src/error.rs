//! Tandem Error Types
//!
//! Errors are split by how they travel: `RequestError` resolves a
//! `ResponseFuture`, `PollError` unwinds the thread driving the poll cycle.

use crate::request::NodeId;
use std::time::Duration;
use thiserror::Error;

/// Credential failure reported by the transport for a node.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Authentication failed: {message}")]
pub struct AuthenticationError {
    message: String,
}

impl AuthenticationError {
    /// Create an authentication error with a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The transport-supplied failure description
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failures delivered through a request's future.
///
/// These never cross the poll boundary synchronously; every waiter and
/// listener on the same future observes a clone of the same error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// Request aged out before transmission or before its response arrived
    #[error("Request timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// Connection to the node dropped before or after the request was sent
    #[error("Node {node} disconnected")]
    Disconnected { node: NodeId },

    /// Transport reported a credential failure for the node
    #[error(transparent)]
    AuthenticationFailed(#[from] AuthenticationError),

    /// Protocol negotiation failed for this request
    #[error("Unsupported version: {0}")]
    VersionMismatch(String),
}

impl RequestError {
    /// Create a timeout error
    #[must_use]
    pub const fn timeout(elapsed: Duration) -> Self {
        Self::Timeout { elapsed }
    }

    /// Create a disconnect error for a node
    #[must_use]
    pub const fn disconnected(node: NodeId) -> Self {
        Self::Disconnected { node }
    }

    /// Create a version mismatch error with a message
    pub fn version_mismatch(msg: impl Into<String>) -> Self {
        Self::VersionMismatch(msg.into())
    }

    /// Check if resubmitting the same request may succeed
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Disconnected { .. })
    }

    /// Check if this is a connection error
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Disconnected { .. } | Self::AuthenticationFailed(_)
        )
    }
}

/// Internal invariant violation: a node was asked for in-flight state it
/// does not have.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("There are no in-flight requests for node {node}")]
pub struct EmptyQueue {
    pub node: NodeId,
}

/// Errors raised synchronously out of the poll methods.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    /// Another thread requested the blocking poll to unwind
    #[error("Poll cancelled by user wakeup")]
    Cancelled,

    /// The polling thread was interrupted
    #[error("Polling thread interrupted")]
    Interrupted,

    /// Bookkeeping bug: completion arrived for a node with nothing in flight
    #[error(transparent)]
    EmptyQueue(#[from] EmptyQueue),

    /// Client already closed
    #[error("Client closed")]
    Closed,
}

impl PollError {
    /// Check if the caller may simply poll again
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Interrupted)
    }
}

/// Result type alias for poll operations
pub type Result<T, E = PollError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_error_display() {
        let err = RequestError::disconnected(NodeId(3));
        assert_eq!(err.to_string(), "Node node-3 disconnected");

        let err = RequestError::timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "Request timed out after 250ms");

        let err: RequestError = AuthenticationError::new("bad password").into();
        assert_eq!(err.to_string(), "Authentication failed: bad password");
    }

    #[test]
    fn test_request_error_classification() {
        assert!(RequestError::timeout(Duration::ZERO).is_retriable());
        assert!(RequestError::disconnected(NodeId(1)).is_retriable());
        assert!(!RequestError::version_mismatch("v9").is_retriable());

        assert!(RequestError::disconnected(NodeId(1)).is_connection_error());
        assert!(RequestError::AuthenticationFailed(AuthenticationError::new("x")).is_connection_error());
        assert!(!RequestError::timeout(Duration::ZERO).is_connection_error());
    }

    #[test]
    fn test_poll_error_from_empty_queue() {
        let err: PollError = EmptyQueue { node: NodeId(7) }.into();
        assert_eq!(err, PollError::EmptyQueue(EmptyQueue { node: NodeId(7) }));
        assert!(!err.is_recoverable());
        assert!(PollError::Cancelled.is_recoverable());
        assert!(err.to_string().contains("node-7"));
    }
}
