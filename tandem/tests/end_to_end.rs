//! End-to-end tests through the public facade.
//!
//! Several submitter threads share one client while a dedicated thread
//! drives the poll loop, over both the mock and a hand-written transport.

#![cfg(feature = "client")]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tandem::client::prelude::*;
use tandem::{ClientRequest, RequestHeader};

/// Answers every request with its payload upper-cased.
struct LoopbackTransport {
    events: VecDeque<TransportEvent>,
    next_correlation_id: u32,
    wake_tx: flume::Sender<()>,
    wake_rx: flume::Receiver<()>,
}

struct ChannelWaker(flume::Sender<()>);

impl TransportWaker for ChannelWaker {
    fn wake(&self) {
        let _ = self.0.try_send(());
    }
}

impl LoopbackTransport {
    fn new() -> Self {
        let (wake_tx, wake_rx) = flume::bounded(1);
        Self {
            events: VecDeque::new(),
            next_correlation_id: 0,
            wake_tx,
            wake_rx,
        }
    }
}

impl Transport for LoopbackTransport {
    fn ready(&mut self, _node: NodeId, _now: Instant) -> bool {
        true
    }

    fn send(&mut self, request: &ClientRequest, _now: Instant) -> RequestHeader {
        let node = request.node();
        self.events.push_back(TransportEvent::SendCompleted { node });
        if request.expects_response() {
            self.events.push_back(TransportEvent::Response {
                node,
                body: Bytes::from(request.payload().to_ascii_uppercase()),
                version_mismatch: None,
            });
        }
        self.next_correlation_id += 1;
        RequestHeader {
            correlation_id: self.next_correlation_id,
        }
    }

    fn poll_delay(&self, _node: NodeId, _now: Instant) -> Duration {
        Duration::MAX
    }

    fn poll(&mut self, timeout: Duration, _now: Instant) -> Vec<TransportEvent> {
        if self.events.is_empty() && !timeout.is_zero() {
            let _ = self.wake_rx.recv_timeout(timeout);
        }
        self.events.drain(..).collect()
    }

    fn connection_failed(&self, _node: NodeId) -> bool {
        false
    }

    fn connection_delay(&self, _node: NodeId, _now: Instant) -> Duration {
        Duration::ZERO
    }

    fn disconnect(&mut self, node: NodeId) {
        self.events.retain(|event| event.node() != node);
    }

    fn authentication_error(&self, _node: NodeId) -> Option<AuthenticationError> {
        None
    }

    fn waker(&self) -> Arc<dyn TransportWaker> {
        Arc::new(ChannelWaker(self.wake_tx.clone()))
    }

    fn close(&mut self) {
        self.events.clear();
    }
}

fn spawn_poller<T: Transport + 'static>(
    client: Arc<PipeliningClient<T>>,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("poller".into())
        .spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                client.poll_once(Duration::from_millis(10)).unwrap();
            }
        })
        .unwrap()
}

#[test]
fn test_many_submitters_one_poller() {
    tandem::dev_tracing::init_tracing();

    let client = Arc::new(PipeliningClient::new(
        LoopbackTransport::new(),
        ClientOptions::default().with_max_in_flight_per_node(3),
    ));
    let stop = Arc::new(AtomicBool::new(false));
    let poller = spawn_poller(client.clone(), stop.clone());

    let submitters: Vec<_> = (0..4u32)
        .map(|t| {
            let client = client.clone();
            thread::spawn(move || {
                let futures: Vec<_> = (0..50)
                    .map(|i| {
                        let node = NodeId(i % 3);
                        let payload = format!("t{t}-req{i}");
                        (payload.clone(), client.submit(node, RequestBuilder::new(payload)))
                    })
                    .collect();
                for (payload, future) in futures {
                    let response = future
                        .wait_timeout(Duration::from_secs(10))
                        .expect("request never completed")
                        .expect("request failed");
                    assert_eq!(response.body.unwrap(), payload.to_ascii_uppercase().as_str());
                }
            })
        })
        .collect();

    for submitter in submitters {
        submitter.join().unwrap();
    }
    stop.store(true, Ordering::SeqCst);
    poller.join().unwrap();

    assert!(!client.has_pending_or_in_flight());
}

#[test]
fn test_mapped_future_over_mock() {
    let (transport, handle) = MockTransport::new();
    handle.set_echo(true);
    let client = PipeliningClient::new(transport, ClientOptions::default());

    let length = client
        .submit(NodeId(9), RequestBuilder::new("twelve bytes"))
        .map(|response| response.body.map_or(0, |body| body.len()));
    client.poll_until(&length).unwrap();

    assert_eq!(length.value(), Some(12));
}

#[test]
fn test_close_unblocks_waiters() {
    let (transport, handle) = MockTransport::new();
    handle.set_ready(NodeId(1), false);
    let client = Arc::new(PipeliningClient::new(transport, ClientOptions::default()));
    let future = client.submit(NodeId(1), RequestBuilder::new("stuck"));

    let waiter = {
        let future = future.clone();
        thread::spawn(move || future.wait_timeout(Duration::from_secs(5)))
    };
    thread::sleep(Duration::from_millis(20));
    client.close();

    let result = waiter.join().unwrap().expect("waiter timed out");
    assert_eq!(result.unwrap_err(), RequestError::disconnected(NodeId(1)));
}
