//! Thread-safe pipelining client.
//!
//! Any thread may submit requests or query counts. Exactly one thread at a
//! time runs the poll cycle, which is the only place the transport and the
//! in-flight tracker are touched:
//!
//! ```text
//!  submit ──▶ PendingQueue ──try_send──▶ Transport + InFlightTracker
//!                 │                              │
//!        expiry / connection failure      responses / drops / timeouts
//!                 ▼                              ▼
//!            CompletionRelay ◀───────────────────┘
//!                 │
//!      drain_and_fire (outside the lock) ──▶ ResponseFuture listeners
//! ```
//!
//! Completions never fire under the main lock, so a listener may submit
//! more work or poll again without deadlocking. The main lock is re-entrant:
//! a [`PollCondition`] runs while the poller holds it and may still query
//! the client.

use crate::transport::{Transport, TransportEvent, TransportWaker};
use flume::{Receiver, Sender};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tandem_core::clock::{Clock, SystemClock};
use tandem_core::error::{AuthenticationError, EmptyQueue, PollError, RequestError, Result};
use tandem_core::future::ResponseFuture;
use tandem_core::in_flight::{InFlightCounter, InFlightTracker};
use tandem_core::interrupt;
use tandem_core::options::ClientOptions;
use tandem_core::pending::PendingQueue;
use tandem_core::relay::CompletionRelay;
use tandem_core::request::{ClientRequest, ClientResponse, NodeId, RequestBuilder};
use tracing::{debug, error, trace, warn};

/// Decides whether a poll cycle may block waiting for I/O.
pub trait PollCondition {
    /// `false` once the caller's goal is met and polling should not wait.
    ///
    /// Called with the main lock held by the polling thread. Querying the
    /// client from here is fine; no borrow of the poll state is outstanding.
    fn should_block(&self) -> bool;
}

impl<T: Clone> PollCondition for ResponseFuture<T> {
    fn should_block(&self) -> bool {
        !self.is_done()
    }
}

/// State only touched while holding the main lock.
///
/// Borrows never outlive a single phase of the cycle, so re-entrant
/// callers on the polling thread find the cell free.
struct Inner<T> {
    transport: T,
    in_flight: InFlightTracker,
}

/// Blocking, thread-safe request pipeliner over a [`Transport`].
///
/// # Examples
///
/// ```
/// use tandem_client::mock::MockTransport;
/// use tandem_client::PipeliningClient;
/// use tandem_core::prelude::*;
///
/// let (transport, handle) = MockTransport::new();
/// handle.set_echo(true);
/// let client = PipeliningClient::new(transport, ClientOptions::default());
///
/// let future = client.submit(NodeId(7), RequestBuilder::new("hello"));
/// client.poll_until(&future).unwrap();
/// assert_eq!(future.value().unwrap().body.unwrap(), "hello");
/// ```
pub struct PipeliningClient<T: Transport> {
    inner: ReentrantMutex<RefCell<Inner<T>>>,
    pending: PendingQueue,
    relay: CompletionRelay,
    disconnects_tx: Sender<NodeId>,
    disconnects_rx: Receiver<NodeId>,
    wakeup: AtomicBool,
    cancellation_suppressed: AtomicBool,
    closed: AtomicBool,
    in_flight: InFlightCounter,
    waker: Arc<dyn TransportWaker>,
    clock: Arc<dyn Clock>,
    options: ClientOptions,
}

impl<T: Transport> PipeliningClient<T> {
    /// Create a client measuring time with the system clock.
    pub fn new(transport: T, options: ClientOptions) -> Self {
        Self::with_clock(transport, options, Arc::new(SystemClock))
    }

    /// Create a client with an explicit time source.
    pub fn with_clock(transport: T, options: ClientOptions, clock: Arc<dyn Clock>) -> Self {
        let in_flight = InFlightTracker::new(options.max_in_flight_per_node);
        let counter = in_flight.counter();
        let waker = transport.waker();
        let (disconnects_tx, disconnects_rx) = flume::unbounded();
        debug!(
            max_in_flight_per_node = in_flight.max_per_node(),
            request_timeout = ?options.request_timeout,
            "Pipelining client created"
        );
        Self {
            inner: ReentrantMutex::new(RefCell::new(Inner {
                transport,
                in_flight,
            })),
            pending: PendingQueue::new(),
            relay: CompletionRelay::new(),
            disconnects_tx,
            disconnects_rx,
            wakeup: AtomicBool::new(false),
            cancellation_suppressed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            in_flight: counter,
            waker,
            clock,
            options,
        }
    }

    #[inline]
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Queue a request for `node` and return its future.
    ///
    /// Never blocks on the main lock. Nothing is sent until some thread
    /// polls; a blocked poller is woken to pick the request up.
    pub fn submit(&self, node: NodeId, builder: RequestBuilder) -> ResponseFuture<ClientResponse> {
        let now = self.clock.now();
        let (request, future) =
            ClientRequest::new(node, builder, now, self.options.request_timeout);
        self.pending.enqueue(request);

        if self.closed.load(Ordering::SeqCst) {
            // Raced with close(); whoever removes the request fails it
            for request in self.pending.remove_all(node) {
                self.relay.publish(request.into_failure(RequestError::disconnected(node)));
            }
            self.relay.drain_and_fire();
        } else {
            self.waker.wake();
        }
        future
    }

    /// Poll until `future` resolves.
    pub fn poll_until<U: Clone>(&self, future: &ResponseFuture<U>) -> Result<()> {
        while !future.is_done() {
            self.poll_with(Duration::MAX, Some(future))?;
        }
        Ok(())
    }

    /// Poll until `future` resolves or `timeout` elapses. Returns whether the
    /// future resolved.
    pub fn poll_until_timeout<U: Clone>(
        &self,
        future: &ResponseFuture<U>,
        timeout: Duration,
    ) -> Result<bool> {
        let begin = self.clock.now();
        let mut remaining = timeout;
        loop {
            self.poll_with(remaining, Some(future))?;
            if future.is_done() {
                return Ok(true);
            }
            let elapsed = self.clock.now().saturating_duration_since(begin);
            if elapsed >= timeout {
                return Ok(future.is_done());
            }
            remaining = timeout - elapsed;
        }
    }

    /// Run one poll cycle, blocking for at most `timeout`.
    pub fn poll_once(&self, timeout: Duration) -> Result<()> {
        self.poll_with(timeout, None)
    }

    /// Run one poll cycle; block only while `condition` says so.
    pub fn poll_with(&self, timeout: Duration, condition: Option<&dyn PollCondition>) -> Result<()> {
        self.cycle(timeout, condition, false)
    }

    /// Run one non-blocking cycle that ignores cancellation requests.
    pub fn poll_no_block_no_cancel(&self) -> Result<()> {
        self.cycle(Duration::ZERO, None, true)
    }

    /// Poll until nothing is pending or in flight to `node`, or `timeout`
    /// elapses. Returns whether `node` went idle.
    pub fn await_idle(&self, node: NodeId, timeout: Duration) -> Result<bool> {
        let begin = self.clock.now();
        let mut remaining = timeout;
        while self.has_pending_or_in_flight_for(node) && !remaining.is_zero() {
            self.poll_once(remaining)?;
            let elapsed = self.clock.now().saturating_duration_since(begin);
            remaining = timeout.saturating_sub(elapsed);
        }
        Ok(!self.has_pending_or_in_flight_for(node))
    }

    /// Make the current or next blocking poll return [`PollError::Cancelled`].
    pub fn cancel_blocking_poll(&self) {
        debug!("Received user wakeup");
        self.wakeup.store(true, Ordering::SeqCst);
        self.waker.wake();
    }

    /// Force-disconnect `node` on the next poll cycle.
    ///
    /// Pending requests fail with [`RequestError::Disconnected`]; in-flight
    /// requests resolve as disconnected responses.
    pub fn disconnect(&self, node: NodeId) {
        // Both halves live in `self`, so the channel cannot be disconnected
        let _ = self.disconnects_tx.send(node);
        self.waker.wake();
    }

    /// Stop raising [`PollError::Cancelled`] for this client.
    ///
    /// Used by shutdown paths that must drain without being interrupted.
    pub fn suppress_cancellation(&self) {
        self.set_cancellation_suppressed(true);
    }

    /// Set cancellation suppression, returning the previous value so nested
    /// callers can restore it.
    pub fn set_cancellation_suppressed(&self, suppressed: bool) -> bool {
        self.cancellation_suppressed.swap(suppressed, Ordering::SeqCst)
    }

    pub fn is_cancellation_suppressed(&self) -> bool {
        self.cancellation_suppressed.load(Ordering::SeqCst)
    }

    /// Requests pending or in flight across every node.
    pub fn pending_and_in_flight_count(&self) -> usize {
        self.pending.total_count() + self.in_flight.get()
    }

    /// Requests pending or in flight to `node`.
    pub fn pending_and_in_flight_count_for(&self, node: NodeId) -> usize {
        self.pending.count_for(node) + self.in_flight_count(node)
    }

    pub fn has_pending_or_in_flight(&self) -> bool {
        self.pending.has_any() || self.in_flight.get() > 0
    }

    pub fn has_pending_or_in_flight_for(&self, node: NodeId) -> bool {
        self.pending.has_requests(node) || self.in_flight_count(node) > 0
    }

    pub fn pending_count(&self, node: NodeId) -> usize {
        self.pending.count_for(node)
    }

    pub fn in_flight_count(&self, node: NodeId) -> usize {
        self.inner.lock().borrow().in_flight.count_for(node)
    }

    /// Whether `node` failed to connect and is still backing off.
    pub fn is_unavailable(&self, node: NodeId) -> bool {
        let now = self.clock.now();
        let guard = self.inner.lock();
        let inner = guard.borrow();
        inner.transport.connection_failed(node)
            && !inner.transport.connection_delay(node, now).is_zero()
    }

    /// Surface a recorded credential failure for `node`.
    pub fn check_authentication(&self, node: NodeId) -> std::result::Result<(), AuthenticationError> {
        match self.inner.lock().borrow().transport.authentication_error(node) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Start connecting to `node` without sending. Returns whether the node
    /// is ready now.
    pub fn try_connect(&self, node: NodeId) -> bool {
        let now = self.clock.now();
        self.inner.lock().borrow_mut().transport.ready(node, now)
    }

    /// Close the transport and fail everything pending or in flight with
    /// [`RequestError::Disconnected`]. Later polls return
    /// [`PollError::Closed`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let guard = self.inner.lock();
        {
            let mut inner = guard.borrow_mut();
            let now = self.clock.now();
            for node in self.pending.nodes() {
                for request in self.pending.remove_all(node) {
                    self.relay.publish(request.into_failure(RequestError::disconnected(node)));
                }
            }
            for node in inner.in_flight.nodes() {
                for request in inner.in_flight.drain_all(node) {
                    self.relay.publish(request.into_disconnect(now, None));
                }
            }
            inner.transport.close();
        }
        ReentrantMutexGuard::unlock_fair(guard);

        let fired = self.relay.drain_and_fire();
        debug!(fired, "Pipelining client closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn cycle(
        &self,
        timeout: Duration,
        condition: Option<&dyn PollCondition>,
        disable_cancellation: bool,
    ) -> Result<()> {
        if self.is_closed() {
            return Err(PollError::Closed);
        }

        // Callbacks from a previous cycle may have queued follow-up requests
        self.fire_completions();

        let guard = self.inner.lock();
        // close() may have run while this thread waited for the lock
        let result = if self.is_closed() {
            Err(PollError::Closed)
        } else {
            self.cycle_locked(&guard, timeout, condition, disable_cancellation)
        };
        ReentrantMutexGuard::unlock_fair(guard);

        // Completions published before an error still belong to their callers
        self.fire_completions();
        result
    }

    fn cycle_locked(
        &self,
        cell: &RefCell<Inner<T>>,
        timeout: Duration,
        condition: Option<&dyn PollCondition>,
        disable_cancellation: bool,
    ) -> Result<()> {
        let mut now = self.clock.now();
        let poll_delay = {
            let mut inner = cell.borrow_mut();
            self.apply_pending_disconnects(&mut inner, now);
            self.try_send(&mut inner, now)
        };
        let mut timeout = timeout.min(poll_delay);

        // No borrow outstanding: the condition may call back into the client
        let block = self.relay.is_empty() && condition.map_or(true, |c| c.should_block());
        if self.is_closed() {
            return Err(PollError::Closed);
        }

        let mut inner = cell.borrow_mut();
        let inner = &mut *inner;
        let events = if block {
            if inner.in_flight.is_empty() {
                // Nothing to wait for; come back soon to retry connecting
                timeout = timeout.min(self.options.retry_backoff);
            }
            let events = inner
                .transport
                .poll(timeout.min(self.options.max_poll_timeout), now);
            now = self.clock.now();
            events
        } else {
            inner.transport.poll(Duration::ZERO, now)
        };
        self.handle_events(inner, events, now)?;
        self.handle_in_flight_timeouts(inner, now);

        self.check_disconnects(inner, now);

        if !disable_cancellation {
            self.maybe_trigger_wakeup()?;
        }
        if interrupt::take() {
            debug!("Poll interrupted");
            return Err(PollError::Interrupted);
        }

        // Responses may have freed pipelining slots
        self.try_send(inner, now);
        self.fail_expired_requests(now);
        self.pending.compact();
        Ok(())
    }

    /// Apply disconnects queued by [`disconnect`](Self::disconnect).
    fn apply_pending_disconnects(&self, inner: &mut Inner<T>, now: Instant) {
        while let Ok(node) = self.disconnects_rx.try_recv() {
            debug!(%node, "Disconnecting on request");
            for request in self.pending.remove_all(node) {
                self.relay.publish(request.into_failure(RequestError::disconnected(node)));
            }
            inner.transport.disconnect(node);
            self.fail_in_flight(inner, node, now);
        }
    }

    /// Move pending requests into flight while each node has capacity.
    /// Returns the smallest poll delay the transport asked for.
    ///
    /// Each request is popped under its shard lock and sent after the lock
    /// is released, so submitters never wait on transport I/O.
    fn try_send(&self, inner: &mut Inner<T>, now: Instant) -> Duration {
        let mut poll_delay = Duration::MAX;
        for node in self.pending.nodes() {
            if !self.pending.has_requests(node) {
                continue;
            }
            poll_delay = poll_delay.min(inner.transport.poll_delay(node, now));

            while self.pending.has_requests(node)
                && inner.transport.ready(node, now)
                && inner.in_flight.can_send_more(node)
            {
                // Only the poller pops; a concurrent close() may still empty the queue
                let Some(mut request) = self.pending.pop_front(node) else {
                    break;
                };
                let header = inner.transport.send(&request, now);
                request.mark_sent(header, now);
                trace!(%node, correlation_id = header.correlation_id, "Request sent");
                inner.in_flight.add(request);
            }
        }
        poll_delay
    }

    /// Apply every event in the batch. The batch is already drained from
    /// the transport, so a defect in one event is reported only after the
    /// rest are applied.
    fn handle_events(
        &self,
        inner: &mut Inner<T>,
        events: Vec<TransportEvent>,
        now: Instant,
    ) -> Result<()> {
        let mut first_defect = None;
        for event in events {
            if let Err(err) = self.handle_event(inner, event, now) {
                first_defect.get_or_insert(err);
            }
        }
        match first_defect {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn handle_event(&self, inner: &mut Inner<T>, event: TransportEvent, now: Instant) -> Result<()> {
        match event {
            TransportEvent::SendCompleted { node } => {
                let newest = inner.in_flight.peek_newest_mut(node).map_err(defect)?;
                newest.mark_transmitted();
                if !newest.expects_response() {
                    let request = inner.in_flight.complete_newest(node).map_err(defect)?;
                    self.relay.publish(request.into_response(now, None, None));
                }
            }
            TransportEvent::Response {
                node,
                body,
                version_mismatch,
            } => {
                let request = inner.in_flight.complete_oldest(node).map_err(defect)?;
                trace!(%node, header = ?request.header(), "Response received");
                self.relay
                    .publish(request.into_response(now, Some(body), version_mismatch));
            }
            TransportEvent::Disconnected { node } => {
                debug!(%node, "Connection dropped");
                self.fail_in_flight(inner, node, now);
            }
        }
        Ok(())
    }

    /// Disconnect nodes with a request in flight past its timeout.
    ///
    /// The expired requests fail with a timeout; everything else in flight
    /// on the dropped connection resolves as disconnected.
    fn handle_in_flight_timeouts(&self, inner: &mut Inner<T>, now: Instant) {
        for node in inner.in_flight.expired_endpoints(now) {
            warn!(%node, "Disconnecting from node due to request timeout");
            inner.transport.disconnect(node);
            for request in inner.in_flight.drain_all(node) {
                if request.is_send_expired(now) {
                    let elapsed = request
                        .sent_at()
                        .map_or(request.timeout(), |sent| now.saturating_duration_since(sent));
                    self.relay.publish(request.into_failure(RequestError::timeout(elapsed)));
                } else {
                    self.relay.publish(request.into_disconnect(now, None));
                }
            }
        }
    }

    /// Resolve everything in flight to `node` as disconnected.
    fn fail_in_flight(&self, inner: &mut Inner<T>, node: NodeId, now: Instant) {
        let requests = inner.in_flight.drain_all(node);
        if requests.is_empty() {
            return;
        }
        let auth = inner.transport.authentication_error(node);
        debug!(%node, count = requests.len(), "Failing in-flight requests");
        for request in requests {
            self.relay.publish(request.into_disconnect(now, auth.clone()));
        }
    }

    /// Fail pending requests for nodes whose connection attempt failed.
    fn check_disconnects(&self, inner: &mut Inner<T>, now: Instant) {
        for node in self.pending.nodes() {
            if !inner.transport.connection_failed(node) {
                continue;
            }
            let requests = self.pending.remove_all(node);
            if requests.is_empty() {
                continue;
            }
            let auth = inner.transport.authentication_error(node);
            debug!(%node, count = requests.len(), "Failing pending requests, connection failed");
            for request in requests {
                self.relay.publish(request.into_disconnect(now, auth.clone()));
            }
        }
    }

    fn maybe_trigger_wakeup(&self) -> Result<()> {
        if !self.cancellation_suppressed.load(Ordering::SeqCst)
            && self.wakeup.swap(false, Ordering::SeqCst)
        {
            debug!("Raising wakeup in response to user wakeup");
            return Err(PollError::Cancelled);
        }
        Ok(())
    }

    fn fail_expired_requests(&self, now: Instant) {
        for request in self.pending.remove_expired(now) {
            let elapsed = request.age(now);
            debug!(
                node = %request.node(),
                ?elapsed,
                "Failed to send request before its timeout"
            );
            self.relay.publish(request.into_failure(RequestError::timeout(elapsed)));
        }
    }

    fn fire_completions(&self) {
        if self.relay.drain_and_fire() > 0 {
            // Wake a concurrent poller so it notices newly completed futures
            self.waker.wake();
        }
    }
}

fn defect(err: EmptyQueue) -> PollError {
    error!(node = %err.node, "Completion for a node with nothing in flight");
    err.into()
}
