//! Completion relay: hand-off queue between bookkeeping and callbacks.
//!
//! Producers (transport event handling, expiry sweeps, disconnect handling)
//! publish finished requests from any thread. The poll cycle drains the
//! relay outside its main lock, so a callback that submits new work or
//! polls again cannot deadlock against the thread doing I/O.

use crate::error::RequestError;
use crate::future::Completer;
use crate::request::ClientResponse;
use flume::{Receiver, Sender};
use tracing::debug;

enum Outcome {
    Response(ClientResponse),
    Failure(RequestError),
}

/// A finished request waiting for its future to be resolved.
pub struct CompletionHandler {
    completer: Completer<ClientResponse>,
    outcome: Outcome,
}

impl CompletionHandler {
    pub(crate) fn response(completer: Completer<ClientResponse>, response: ClientResponse) -> Self {
        Self {
            completer,
            outcome: Outcome::Response(response),
        }
    }

    pub(crate) fn failure(completer: Completer<ClientResponse>, error: RequestError) -> Self {
        Self {
            completer,
            outcome: Outcome::Failure(error),
        }
    }

    /// Resolve the future.
    ///
    /// Priority: explicit failure, then authentication error on the
    /// response, then disconnect flag, then version mismatch, then success.
    pub fn fire(self) {
        let response = match self.outcome {
            Outcome::Failure(error) => return self.completer.fail(error),
            Outcome::Response(response) => response,
        };

        if let Some(auth) = response.authentication_error {
            self.completer.fail(RequestError::AuthenticationFailed(auth));
        } else if response.disconnected {
            debug!(
                header = ?response.header,
                node = %response.node,
                "Cancelled request due to node being disconnected"
            );
            self.completer.fail(RequestError::disconnected(response.node));
        } else if let Some(mismatch) = response.version_mismatch {
            self.completer.fail(RequestError::VersionMismatch(mismatch));
        } else {
            self.completer.complete(response);
        }
    }
}

/// Multiple-producer queue of completions awaiting their callbacks.
pub struct CompletionRelay {
    tx: Sender<CompletionHandler>,
    rx: Receiver<CompletionHandler>,
}

impl CompletionRelay {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx }
    }

    /// Queue a completion. Safe from any thread.
    pub fn publish(&self, handler: CompletionHandler) {
        // Both halves live in `self`, so the channel cannot be disconnected
        let _ = self.tx.send(handler);
    }

    /// Fire every queued completion until the relay is empty.
    ///
    /// Must be called without holding the client's main lock. Returns the
    /// number of completions fired.
    pub fn drain_and_fire(&self) -> usize {
        let mut fired = 0;
        while let Ok(handler) = self.rx.try_recv() {
            handler.fire();
            fired += 1;
        }
        fired
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }
}

impl Default for CompletionRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthenticationError;
    use crate::future::ResponseFuture;
    use crate::request::{ClientRequest, NodeId, RequestBuilder, RequestHeader};
    use bytes::Bytes;
    use std::time::{Duration, Instant};

    fn request() -> (ClientRequest, ResponseFuture<ClientResponse>) {
        ClientRequest::new(
            NodeId(1),
            RequestBuilder::new("ping"),
            Instant::now(),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_publish_defers_until_drain() {
        let relay = CompletionRelay::new();
        let (req, future) = request();

        relay.publish(req.into_response(Instant::now(), Some(Bytes::from("pong")), None));
        assert!(!future.is_done());
        assert_eq!(relay.len(), 1);

        assert_eq!(relay.drain_and_fire(), 1);
        assert!(relay.is_empty());
        let response = future.value().unwrap();
        assert_eq!(response.body, Some(Bytes::from("pong")));
        assert!(!response.disconnected);
    }

    #[test]
    fn test_drain_twice_fires_once() {
        let relay = CompletionRelay::new();
        let (req, future) = request();
        relay.publish(req.into_failure(RequestError::timeout(Duration::from_secs(1))));

        assert_eq!(relay.drain_and_fire(), 1);
        assert_eq!(relay.drain_and_fire(), 0);
        assert_eq!(future.error(), Some(RequestError::timeout(Duration::from_secs(1))));
    }

    #[test]
    fn test_fire_priority_authentication_before_disconnect() {
        let relay = CompletionRelay::new();
        let (req, future) = request();
        let auth = AuthenticationError::new("expired token");
        relay.publish(req.into_disconnect(Instant::now(), Some(auth.clone())));
        relay.drain_and_fire();

        assert_eq!(future.error(), Some(RequestError::AuthenticationFailed(auth)));
    }

    #[test]
    fn test_fire_disconnect() {
        let relay = CompletionRelay::new();
        let (mut req, future) = request();
        req.mark_sent(RequestHeader { correlation_id: 1 }, Instant::now());
        relay.publish(req.into_disconnect(Instant::now(), None));
        relay.drain_and_fire();

        assert_eq!(future.error(), Some(RequestError::disconnected(NodeId(1))));
    }

    #[test]
    fn test_fire_version_mismatch() {
        let relay = CompletionRelay::new();
        let (req, future) = request();
        relay.publish(req.into_response(Instant::now(), None, Some("v3 unsupported".into())));
        relay.drain_and_fire();

        assert_eq!(
            future.error(),
            Some(RequestError::version_mismatch("v3 unsupported"))
        );
    }

    #[test]
    fn test_publish_from_many_threads() {
        let relay = std::sync::Arc::new(CompletionRelay::new());
        let mut futures = Vec::new();
        let mut producers = Vec::new();

        for _ in 0..4 {
            let mut batch = Vec::new();
            for _ in 0..25 {
                let (req, future) = request();
                futures.push(future);
                batch.push(req);
            }
            let relay = relay.clone();
            producers.push(std::thread::spawn(move || {
                for req in batch {
                    relay.publish(req.into_response(Instant::now(), None, None));
                }
            }));
        }
        for p in producers {
            p.join().unwrap();
        }

        assert_eq!(relay.drain_and_fire(), 100);
        assert!(futures.iter().all(ResponseFuture::succeeded));
    }
}
