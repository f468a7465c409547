//! Scriptable in-memory transport.
//!
//! [`MockTransport`] is handed to the client; the paired [`MockHandle`] stays
//! with the test (or benchmark) and scripts what the transport reports:
//! readiness, connection failures, responses and drops. Both share one
//! state cell, so scripting from another thread wakes a blocked poll.
//!
//! ```
//! use tandem_client::mock::MockTransport;
//! use tandem_client::PipeliningClient;
//! use tandem_core::prelude::*;
//! use std::time::Duration;
//!
//! let (transport, handle) = MockTransport::new();
//! let client = PipeliningClient::new(transport, ClientOptions::default());
//!
//! let future = client.submit(NodeId(1), RequestBuilder::new("ping"));
//! client.poll_once(Duration::ZERO).unwrap();
//! handle.respond(NodeId(1), "pong");
//! client.poll_until(&future).unwrap();
//!
//! assert_eq!(future.value().unwrap().body.unwrap(), "pong");
//! ```

use crate::transport::{Transport, TransportEvent, TransportWaker};
use bytes::Bytes;
use hashbrown::{HashMap, HashSet};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tandem_core::error::AuthenticationError;
use tandem_core::request::{ClientRequest, NodeId, RequestHeader};
use tracing::trace;

/// A request as the mock saw it at send time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRecord {
    pub node: NodeId,
    pub correlation_id: u32,
    pub payload: Bytes,
    pub expects_response: bool,
}

#[derive(Default)]
struct MockState {
    not_ready: HashSet<NodeId>,
    failed: HashSet<NodeId>,
    auth_errors: HashMap<NodeId, AuthenticationError>,
    poll_delays: HashMap<NodeId, Duration>,
    connection_delays: HashMap<NodeId, Duration>,
    events: VecDeque<TransportEvent>,
    sent: Vec<SentRecord>,
    disconnects: Vec<NodeId>,
    manual_send_completion: bool,
    echo: bool,
    next_correlation_id: u32,
    woken: bool,
    closed: bool,
    poll_count: usize,
    last_poll_timeout: Option<Duration>,
}

struct Shared {
    state: Mutex<MockState>,
    changed: Condvar,
}

impl Shared {
    fn push_event(&self, event: TransportEvent) {
        self.state.lock().events.push_back(event);
        self.changed.notify_all();
    }
}

impl TransportWaker for Shared {
    fn wake(&self) {
        self.state.lock().woken = true;
        self.changed.notify_all();
    }
}

/// In-memory [`Transport`].
///
/// Every node is connected and ready unless scripted otherwise. Sends
/// complete immediately unless [`MockHandle::set_manual_send_completion`]
/// is enabled.
pub struct MockTransport {
    shared: Arc<Shared>,
}

impl MockTransport {
    /// Create a transport and the handle that scripts it.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (Self, MockHandle) {
        let shared = Arc::new(Shared {
            state: Mutex::new(MockState::default()),
            changed: Condvar::new(),
        });
        (
            Self {
                shared: shared.clone(),
            },
            MockHandle { shared },
        )
    }
}

impl Transport for MockTransport {
    fn ready(&mut self, node: NodeId, _now: Instant) -> bool {
        let state = self.shared.state.lock();
        !state.closed && !state.failed.contains(&node) && !state.not_ready.contains(&node)
    }

    fn send(&mut self, request: &ClientRequest, _now: Instant) -> RequestHeader {
        let mut state = self.shared.state.lock();
        let correlation_id = state.next_correlation_id;
        state.next_correlation_id = state.next_correlation_id.wrapping_add(1);

        let node = request.node();
        state.sent.push(SentRecord {
            node,
            correlation_id,
            payload: request.payload().clone(),
            expects_response: request.expects_response(),
        });
        if !state.manual_send_completion {
            state.events.push_back(TransportEvent::SendCompleted { node });
            if state.echo && request.expects_response() {
                state.events.push_back(TransportEvent::Response {
                    node,
                    body: request.payload().clone(),
                    version_mismatch: None,
                });
            }
        }
        trace!(%node, correlation_id, "mock send");
        RequestHeader { correlation_id }
    }

    fn poll_delay(&self, node: NodeId, _now: Instant) -> Duration {
        self.shared
            .state
            .lock()
            .poll_delays
            .get(&node)
            .copied()
            .unwrap_or(Duration::MAX)
    }

    fn poll(&mut self, timeout: Duration, _now: Instant) -> Vec<TransportEvent> {
        let mut state = self.shared.state.lock();
        state.poll_count += 1;
        state.last_poll_timeout = Some(timeout);

        if state.events.is_empty() && !state.woken && !timeout.is_zero() {
            // Saturates for very large timeouts
            let deadline = Instant::now().checked_add(timeout);
            while state.events.is_empty() && !state.woken {
                match deadline {
                    Some(deadline) => {
                        if self.shared.changed.wait_until(&mut state, deadline).timed_out() {
                            break;
                        }
                    }
                    None => self.shared.changed.wait(&mut state),
                }
            }
        }

        state.woken = false;
        state.events.drain(..).collect()
    }

    fn connection_failed(&self, node: NodeId) -> bool {
        self.shared.state.lock().failed.contains(&node)
    }

    fn connection_delay(&self, node: NodeId, _now: Instant) -> Duration {
        self.shared
            .state
            .lock()
            .connection_delays
            .get(&node)
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    fn disconnect(&mut self, node: NodeId) {
        let mut state = self.shared.state.lock();
        state.disconnects.push(node);
        // Events for a closed connection are never delivered
        state.events.retain(|event| event.node() != node);
    }

    fn authentication_error(&self, node: NodeId) -> Option<AuthenticationError> {
        self.shared.state.lock().auth_errors.get(&node).cloned()
    }

    fn waker(&self) -> Arc<dyn TransportWaker> {
        self.shared.clone()
    }

    fn close(&mut self) {
        let mut state = self.shared.state.lock();
        state.closed = true;
        state.events.clear();
    }
}

/// Cloneable scripting handle for a [`MockTransport`].
#[derive(Clone)]
pub struct MockHandle {
    shared: Arc<Shared>,
}

impl MockHandle {
    /// Mark `node` as connecting (not ready) or connected.
    pub fn set_ready(&self, node: NodeId, ready: bool) {
        let mut state = self.shared.state.lock();
        if ready {
            state.not_ready.remove(&node);
        } else {
            state.not_ready.insert(node);
        }
    }

    /// Report the last connection attempt to `node` as failed.
    pub fn fail_connection(&self, node: NodeId) {
        self.shared.state.lock().failed.insert(node);
        self.shared.changed.notify_all();
    }

    /// Clear a connection failure.
    pub fn restore_connection(&self, node: NodeId) {
        self.shared.state.lock().failed.remove(&node);
    }

    /// Record a credential failure for `node`.
    pub fn set_authentication_error(&self, node: NodeId, error: AuthenticationError) {
        self.shared.state.lock().auth_errors.insert(node, error);
    }

    pub fn set_poll_delay(&self, node: NodeId, delay: Duration) {
        self.shared.state.lock().poll_delays.insert(node, delay);
    }

    pub fn set_connection_delay(&self, node: NodeId, delay: Duration) {
        self.shared.state.lock().connection_delays.insert(node, delay);
    }

    /// When enabled, sends stay untransmitted until [`complete_send`].
    ///
    /// [`complete_send`]: Self::complete_send
    pub fn set_manual_send_completion(&self, manual: bool) {
        self.shared.state.lock().manual_send_completion = manual;
    }

    /// Answer every request with its own payload as soon as it is sent.
    pub fn set_echo(&self, echo: bool) {
        self.shared.state.lock().echo = echo;
    }

    /// Report the newest send to `node` as transmitted.
    pub fn complete_send(&self, node: NodeId) {
        self.shared.push_event(TransportEvent::SendCompleted { node });
    }

    /// Deliver a response for the oldest in-flight request to `node`.
    pub fn respond(&self, node: NodeId, body: impl Into<Bytes>) {
        self.shared.push_event(TransportEvent::Response {
            node,
            body: body.into(),
            version_mismatch: None,
        });
    }

    /// Deliver a response flagged with a version mismatch.
    pub fn respond_with_version_mismatch(&self, node: NodeId, message: impl Into<String>) {
        self.shared.push_event(TransportEvent::Response {
            node,
            body: Bytes::new(),
            version_mismatch: Some(message.into()),
        });
    }

    /// Drop the connection to `node`.
    pub fn drop_connection(&self, node: NodeId) {
        self.shared.push_event(TransportEvent::Disconnected { node });
    }

    /// Everything sent so far, in send order.
    pub fn sent(&self) -> Vec<SentRecord> {
        self.shared.state.lock().sent.clone()
    }

    /// Forget the send record, keeping correlation ids increasing.
    pub fn clear_sent(&self) {
        self.shared.state.lock().sent.clear();
    }

    pub fn sent_count(&self, node: NodeId) -> usize {
        self.shared
            .state
            .lock()
            .sent
            .iter()
            .filter(|record| record.node == node)
            .count()
    }

    /// Nodes the client disconnected, in call order.
    pub fn disconnects(&self) -> Vec<NodeId> {
        self.shared.state.lock().disconnects.clone()
    }

    pub fn poll_count(&self) -> usize {
        self.shared.state.lock().poll_count
    }

    /// Timeout passed to the most recent poll.
    pub fn last_poll_timeout(&self) -> Option<Duration> {
        self.shared.state.lock().last_poll_timeout
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Wake a blocked poll without delivering anything.
    pub fn wake(&self) {
        self.shared.wake();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::request::RequestBuilder;

    fn request(node: u32, expect_response: bool) -> ClientRequest {
        let mut builder = RequestBuilder::new("hello");
        if !expect_response {
            builder = builder.without_response();
        }
        ClientRequest::new(NodeId(node), builder, Instant::now(), Duration::from_secs(1)).0
    }

    #[test]
    fn test_send_assigns_increasing_correlation_ids() {
        let (mut transport, handle) = MockTransport::new();
        let now = Instant::now();
        let first = transport.send(&request(1, true), now);
        let second = transport.send(&request(1, false), now);

        assert_eq!(second.correlation_id, first.correlation_id + 1);
        assert_eq!(handle.sent_count(NodeId(1)), 2);
        assert!(!handle.sent()[1].expects_response);

        let events = transport.poll(Duration::ZERO, now);
        assert_eq!(
            events,
            vec![
                TransportEvent::SendCompleted { node: NodeId(1) },
                TransportEvent::SendCompleted { node: NodeId(1) },
            ]
        );
    }

    #[test]
    fn test_readiness_scripting() {
        let (mut transport, handle) = MockTransport::new();
        let now = Instant::now();
        assert!(transport.ready(NodeId(1), now));

        handle.set_ready(NodeId(1), false);
        assert!(!transport.ready(NodeId(1), now));
        assert!(!transport.connection_failed(NodeId(1)));

        handle.set_ready(NodeId(1), true);
        handle.fail_connection(NodeId(1));
        assert!(!transport.ready(NodeId(1), now));
        assert!(transport.connection_failed(NodeId(1)));

        handle.restore_connection(NodeId(1));
        assert!(transport.ready(NodeId(1), now));
    }

    #[test]
    fn test_poll_returns_early_on_wake() {
        let (mut transport, handle) = MockTransport::new();
        let waker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            handle.wake();
        });

        let start = Instant::now();
        let events = transport.poll(Duration::from_secs(10), start);
        assert!(events.is_empty());
        assert!(start.elapsed() < Duration::from_secs(5));
        waker.join().unwrap();
    }

    #[test]
    fn test_disconnect_discards_queued_events() {
        let (mut transport, handle) = MockTransport::new();
        handle.respond(NodeId(1), "a");
        handle.respond(NodeId(2), "b");
        transport.disconnect(NodeId(1));

        let events = transport.poll(Duration::ZERO, Instant::now());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].node(), NodeId(2));
        assert_eq!(handle.disconnects(), vec![NodeId(1)]);
    }
}
