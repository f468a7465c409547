//! Transport collaborator contract.
//!
//! The transport owns connections and byte-level I/O. The client drives it
//! only while holding its main lock, except for [`TransportWaker::wake`],
//! which any thread may call at any time.

use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tandem_core::error::AuthenticationError;
use tandem_core::request::{ClientRequest, NodeId, RequestHeader};

/// Interrupts a blocking [`Transport::poll`]. Callable from any thread.
pub trait TransportWaker: Send + Sync {
    fn wake(&self);
}

/// Something the transport observed during [`Transport::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The newest request sent to `node` fully left the wire.
    SendCompleted { node: NodeId },

    /// A response arrived for the oldest in-flight request to `node`.
    Response {
        node: NodeId,
        body: Bytes,
        /// Set when protocol negotiation rejected the request
        version_mismatch: Option<String>,
    },

    /// The connection to `node` dropped; everything in flight to it is lost.
    Disconnected { node: NodeId },
}

impl TransportEvent {
    /// The node this event concerns.
    pub const fn node(&self) -> NodeId {
        match self {
            Self::SendCompleted { node }
            | Self::Response { node, .. }
            | Self::Disconnected { node } => *node,
        }
    }
}

/// Raw, non-blocking connection pool the client pipelines requests over.
pub trait Transport: Send {
    /// Whether `node` is connected and can take a request now. May start
    /// connecting as a side effect.
    fn ready(&mut self, node: NodeId, now: Instant) -> bool;

    /// Begin writing `request`. Completion of the write is reported later as
    /// [`TransportEvent::SendCompleted`].
    fn send(&mut self, request: &ClientRequest, now: Instant) -> RequestHeader;

    /// How long the client may wait before it should try sending to `node`
    /// again. `Duration::MAX` when the transport has no opinion.
    fn poll_delay(&self, node: NodeId, now: Instant) -> Duration;

    /// Perform I/O, blocking for at most `timeout` unless woken.
    fn poll(&mut self, timeout: Duration, now: Instant) -> Vec<TransportEvent>;

    /// Whether the last connection attempt to `node` failed.
    fn connection_failed(&self, node: NodeId) -> bool;

    /// Time until a reconnect to `node` may be attempted.
    fn connection_delay(&self, node: NodeId, now: Instant) -> Duration;

    /// Close the connection to `node`.
    fn disconnect(&mut self, node: NodeId);

    /// Credential failure recorded for `node`, if any.
    fn authentication_error(&self, node: NodeId) -> Option<AuthenticationError>;

    /// Handle used to interrupt a blocking poll from other threads.
    fn waker(&self) -> Arc<dyn TransportWaker>;

    /// Release every connection.
    fn close(&mut self);
}
