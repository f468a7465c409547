//! Requests, responses and the ids that address them.
//!
//! A [`ClientRequest`] is owned by exactly one container at a time: the
//! pending queue, then the in-flight tracker, then (converted into a
//! [`CompletionHandler`]) the completion relay.

use crate::error::{AuthenticationError, RequestError};
use crate::future::{self, Completer, ResponseFuture};
use crate::relay::CompletionHandler;
use bytes::Bytes;
use std::fmt;
use std::time::{Duration, Instant};

/// Stable identifier of a remote endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Transport-assigned header, attached when the request is handed to the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestHeader {
    pub correlation_id: u32,
}

/// Caller-side description of a request.
///
/// ```
/// use tandem_core::request::RequestBuilder;
/// use std::time::Duration;
///
/// let builder = RequestBuilder::new("fetch")
///     .with_timeout(Duration::from_secs(2));
/// assert!(builder.expects_response());
/// ```
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    payload: Bytes,
    timeout: Option<Duration>,
    expect_response: bool,
}

impl RequestBuilder {
    /// Create a builder carrying an encoded payload.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            timeout: None,
            expect_response: true,
        }
    }

    /// Override the client's default request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Fire-and-forget: the request completes as soon as it leaves the wire.
    pub fn without_response(mut self) -> Self {
        self.expect_response = false;
        self
    }

    /// Whether the remote end answers this request.
    #[must_use]
    pub const fn expects_response(&self) -> bool {
        self.expect_response
    }

    /// The timeout override, if any.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// A request accepted by the client.
pub struct ClientRequest {
    node: NodeId,
    payload: Bytes,
    created: Instant,
    timeout: Duration,
    expect_response: bool,
    header: Option<RequestHeader>,
    sent_at: Option<Instant>,
    transmitted: bool,
    completer: Completer<ClientResponse>,
}

impl ClientRequest {
    /// Build a request and the future its completion resolves.
    ///
    /// `default_timeout` applies when the builder carries no override.
    pub fn new(
        node: NodeId,
        builder: RequestBuilder,
        created: Instant,
        default_timeout: Duration,
    ) -> (Self, ResponseFuture<ClientResponse>) {
        let (completer, future) = future::pair();
        let request = Self {
            node,
            payload: builder.payload,
            created,
            timeout: builder.timeout.unwrap_or(default_timeout),
            expect_response: builder.expect_response,
            header: None,
            sent_at: None,
            transmitted: false,
            completer,
        };
        (request, future)
    }

    #[inline]
    pub const fn node(&self) -> NodeId {
        self.node
    }

    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[inline]
    pub const fn created(&self) -> Instant {
        self.created
    }

    #[inline]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    #[inline]
    pub const fn expects_response(&self) -> bool {
        self.expect_response
    }

    #[inline]
    pub const fn header(&self) -> Option<RequestHeader> {
        self.header
    }

    #[inline]
    pub const fn sent_at(&self) -> Option<Instant> {
        self.sent_at
    }

    /// Whether the transport finished writing this request.
    #[inline]
    pub const fn is_transmitted(&self) -> bool {
        self.transmitted
    }

    /// Record the hand-off to the transport.
    pub fn mark_sent(&mut self, header: RequestHeader, now: Instant) {
        self.header = Some(header);
        self.sent_at = Some(now);
    }

    /// Record that the request fully left the wire.
    pub fn mark_transmitted(&mut self) {
        self.transmitted = true;
    }

    /// Time since creation, saturating at zero.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created)
    }

    /// Pending expiry: strictly older than its timeout.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.age(now) > self.timeout
    }

    /// In-flight expiry: strictly longer than its timeout since it was sent.
    pub fn is_send_expired(&self, now: Instant) -> bool {
        self.sent_at
            .is_some_and(|sent| now.saturating_duration_since(sent) > self.timeout)
    }

    /// Convert into a handler resolving with a received response.
    pub fn into_response(
        self,
        received: Instant,
        body: Option<Bytes>,
        version_mismatch: Option<String>,
    ) -> CompletionHandler {
        let response = ClientResponse {
            node: self.node,
            header: self.header,
            created: self.created,
            received,
            disconnected: false,
            authentication_error: None,
            version_mismatch,
            body,
        };
        CompletionHandler::response(self.completer, response)
    }

    /// Convert into a handler resolving with a synthesized disconnect response.
    pub fn into_disconnect(
        self,
        now: Instant,
        authentication_error: Option<AuthenticationError>,
    ) -> CompletionHandler {
        let response = ClientResponse {
            node: self.node,
            header: self.header,
            created: self.created,
            received: now,
            disconnected: true,
            authentication_error,
            version_mismatch: None,
            body: None,
        };
        CompletionHandler::response(self.completer, response)
    }

    /// Convert into a handler resolving with an explicit failure.
    pub fn into_failure(self, error: RequestError) -> CompletionHandler {
        CompletionHandler::failure(self.completer, error)
    }
}

impl fmt::Debug for ClientRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRequest")
            .field("node", &self.node)
            .field("header", &self.header)
            .field("payload_len", &self.payload.len())
            .field("timeout", &self.timeout)
            .field("expect_response", &self.expect_response)
            .field("transmitted", &self.transmitted)
            .finish()
    }
}

/// Outcome of a request as seen by the transport.
///
/// A response may still resolve its future with an error: disconnect,
/// authentication failure and version mismatch are reported here and
/// converted when the completion fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientResponse {
    pub node: NodeId,
    pub header: Option<RequestHeader>,
    pub created: Instant,
    pub received: Instant,
    pub disconnected: bool,
    pub authentication_error: Option<AuthenticationError>,
    pub version_mismatch: Option<String>,
    pub body: Option<Bytes>,
}

impl ClientResponse {
    /// Round-trip latency from creation to receipt.
    pub fn latency(&self) -> Duration {
        self.received.saturating_duration_since(self.created)
    }
}
