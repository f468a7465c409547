//! Pending (not yet transmitted) requests, queued per node.
//!
//! Submitters enqueue from any thread without the client's main lock. The
//! per-node containers live in a sharded map: creating a container on
//! enqueue and dropping empty containers in [`PendingQueue::compact`] both
//! run under the owning shard's write lock, so an enqueue can never land in
//! a container that compaction is about to discard.

use crate::request::{ClientRequest, NodeId};
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::trace;

/// Per-node FIFO queues of requests awaiting transmission.
#[derive(Debug, Default)]
pub struct PendingQueue {
    queues: DashMap<NodeId, VecDeque<ClientRequest>>,
    total: AtomicUsize,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request to its node's queue. Safe from any thread.
    pub fn enqueue(&self, request: ClientRequest) {
        let mut queue = self.queues.entry(request.node()).or_default();
        queue.push_back(request);
        self.total.fetch_add(1, Ordering::AcqRel);
    }

    pub fn count_for(&self, node: NodeId) -> usize {
        self.queues.get(&node).map_or(0, |q| q.len())
    }

    #[inline]
    pub fn total_count(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    pub fn has_requests(&self, node: NodeId) -> bool {
        self.count_for(node) > 0
    }

    #[inline]
    pub fn has_any(&self) -> bool {
        self.total_count() > 0
    }

    /// Snapshot of nodes that currently own a container.
    ///
    /// Taken up front so callers never hold a shard guard while visiting
    /// another entry.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.queues.iter().map(|entry| *entry.key()).collect()
    }

    /// Remove every request older than its timeout.
    ///
    /// Each node's queue is in creation order, so scanning stops at the
    /// first request that has not expired.
    pub fn remove_expired(&self, now: Instant) -> Vec<ClientRequest> {
        let mut expired = Vec::new();
        for mut entry in self.queues.iter_mut() {
            let queue = entry.value_mut();
            while queue.front().is_some_and(|r| r.is_expired(now)) {
                if let Some(request) = queue.pop_front() {
                    expired.push(request);
                }
            }
        }
        if !expired.is_empty() {
            self.total.fetch_sub(expired.len(), Ordering::AcqRel);
        }
        expired
    }

    /// Remove and return the oldest request for `node`.
    ///
    /// The shard lock is held only for the pop, so callers can hand the
    /// request to slow I/O without stalling submitters.
    pub fn pop_front(&self, node: NodeId) -> Option<ClientRequest> {
        let request = self.queues.get_mut(&node)?.pop_front()?;
        self.total.fetch_sub(1, Ordering::AcqRel);
        Some(request)
    }

    /// Cursor over one node's queue supporting removal at the front.
    ///
    /// The cursor holds the node's shard lock; concurrent submitters to
    /// nodes in the same shard wait until it is dropped. Never hold one
    /// across I/O, use [`pop_front`](Self::pop_front) there.
    pub fn take_iterable(&self, node: NodeId) -> Option<PendingCursor<'_>> {
        self.queues.get_mut(&node).map(|queue| PendingCursor {
            queue,
            total: &self.total,
        })
    }

    /// Remove every pending request for `node`, in submission order.
    pub fn remove_all(&self, node: NodeId) -> Vec<ClientRequest> {
        let Some((_, queue)) = self.queues.remove(&node) else {
            return Vec::new();
        };
        self.total.fetch_sub(queue.len(), Ordering::AcqRel);
        queue.into()
    }

    /// Drop empty per-node containers.
    pub fn compact(&self) {
        self.queues.retain(|node, queue| {
            let keep = !queue.is_empty();
            if !keep {
                trace!(%node, "Dropping empty pending queue");
            }
            keep
        });
    }

    /// Number of per-node containers, empty ones included.
    pub fn container_count(&self) -> usize {
        self.queues.len()
    }
}

/// Front-removal cursor returned by [`PendingQueue::take_iterable`].
pub struct PendingCursor<'a> {
    queue: RefMut<'a, NodeId, VecDeque<ClientRequest>>,
    total: &'a AtomicUsize,
}

impl PendingCursor<'_> {
    /// The next request in submission order.
    pub fn peek(&self) -> Option<&ClientRequest> {
        self.queue.front()
    }

    /// Remove and return the next request.
    pub fn pop(&mut self) -> Option<ClientRequest> {
        let request = self.queue.pop_front()?;
        self.total.fetch_sub(1, Ordering::AcqRel);
        Some(request)
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Iterator for PendingCursor<'_> {
    type Item = ClientRequest;

    fn next(&mut self) -> Option<ClientRequest> {
        self.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestBuilder;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;

    fn request(node: u32, tag: &str, created: Instant, timeout_ms: u64) -> ClientRequest {
        ClientRequest::new(
            NodeId(node),
            RequestBuilder::new(Bytes::copy_from_slice(tag.as_bytes()))
                .with_timeout(Duration::from_millis(timeout_ms)),
            created,
            Duration::from_secs(30),
        )
        .0
    }

    fn recount(queue: &PendingQueue) -> usize {
        queue.nodes().into_iter().map(|n| queue.count_for(n)).sum()
    }

    #[test]
    fn test_enqueue_counts() {
        let now = Instant::now();
        let queue = PendingQueue::new();
        queue.enqueue(request(1, "a", now, 100));
        queue.enqueue(request(1, "b", now, 100));
        queue.enqueue(request(2, "c", now, 100));

        assert_eq!(queue.count_for(NodeId(1)), 2);
        assert_eq!(queue.count_for(NodeId(3)), 0);
        assert_eq!(queue.total_count(), 3);
        assert!(queue.has_requests(NodeId(2)));
        assert!(!queue.has_requests(NodeId(3)));
        assert_eq!(recount(&queue), queue.total_count());
    }

    #[test]
    fn test_cursor_partial_drain_keeps_rest() {
        let now = Instant::now();
        let queue = PendingQueue::new();
        for tag in ["a", "b", "c"] {
            queue.enqueue(request(1, tag, now, 100));
        }

        {
            let mut cursor = queue.take_iterable(NodeId(1)).unwrap();
            assert_eq!(cursor.peek().unwrap().payload(), &Bytes::from("a"));
            assert_eq!(cursor.pop().unwrap().payload(), &Bytes::from("a"));
            assert_eq!(cursor.remaining(), 2);
        }

        assert_eq!(queue.count_for(NodeId(1)), 2);
        assert_eq!(queue.total_count(), 2);
        assert!(queue.take_iterable(NodeId(9)).is_none());
    }

    #[test]
    fn test_pop_front_releases_shard_between_pops() {
        let now = Instant::now();
        let queue = PendingQueue::new();
        queue.enqueue(request(1, "a", now, 100));
        queue.enqueue(request(1, "b", now, 100));

        let first = queue.pop_front(NodeId(1)).unwrap();
        // Enqueue while the popped request is still held
        queue.enqueue(request(1, "c", now, 100));
        assert_eq!(first.payload(), &Bytes::from("a"));
        assert_eq!(queue.pop_front(NodeId(1)).unwrap().payload(), &Bytes::from("b"));
        assert_eq!(queue.pop_front(NodeId(1)).unwrap().payload(), &Bytes::from("c"));
        assert!(queue.pop_front(NodeId(1)).is_none());
        assert!(queue.pop_front(NodeId(9)).is_none());
        assert_eq!(queue.total_count(), 0);
    }

    #[test]
    fn test_remove_expired_stops_at_first_live_request() {
        let start = Instant::now();
        let queue = PendingQueue::new();
        queue.enqueue(request(1, "old", start, 100));
        queue.enqueue(request(1, "young", start + Duration::from_millis(50), 100));
        queue.enqueue(request(2, "other", start, 500));

        let expired = queue.remove_expired(start + Duration::from_millis(120));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].payload(), &Bytes::from("old"));
        assert_eq!(queue.total_count(), 2);

        // No duplicate removal on a second sweep at the same instant
        assert!(queue.remove_expired(start + Duration::from_millis(120)).is_empty());
        assert_eq!(queue.total_count(), 2);
    }

    #[test]
    fn test_remove_expired_boundary() {
        let start = Instant::now();
        let queue = PendingQueue::new();
        queue.enqueue(request(1, "a", start, 100));

        assert!(queue.remove_expired(start + Duration::from_millis(99)).is_empty());
        assert!(queue.remove_expired(start + Duration::from_millis(100)).is_empty());
        assert_eq!(queue.remove_expired(start + Duration::from_millis(101)).len(), 1);
    }

    #[test]
    fn test_remove_all_and_compact() {
        let now = Instant::now();
        let queue = PendingQueue::new();
        queue.enqueue(request(1, "a", now, 100));
        queue.enqueue(request(1, "b", now, 100));
        queue.enqueue(request(2, "c", now, 100));

        let removed = queue.remove_all(NodeId(1));
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0].payload(), &Bytes::from("a"));
        assert!(queue.remove_all(NodeId(1)).is_empty());
        assert_eq!(queue.total_count(), 1);

        queue.take_iterable(NodeId(2)).unwrap().for_each(drop);
        assert_eq!(queue.container_count(), 1);
        queue.compact();
        assert_eq!(queue.container_count(), 0);
        assert_eq!(queue.total_count(), 0);
    }

    #[test]
    fn test_concurrent_enqueue_and_compact_lose_nothing() {
        let queue = Arc::new(PendingQueue::new());
        let now = Instant::now();
        let producers: Vec<_> = (0..4u32)
            .map(|p| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    let mut taken = 0;
                    for i in 0..500u32 {
                        queue.enqueue(request(i % 3, "r", now, 1_000));
                        if i % 7 == 0 {
                            // Empty queues out so compaction has containers to drop
                            if let Some(mut cursor) = queue.take_iterable(NodeId(p % 3)) {
                                taken += cursor.by_ref().count();
                            }
                        }
                    }
                    taken
                })
            })
            .collect();

        let compactor = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                for _ in 0..2_000 {
                    queue.compact();
                }
            })
        };

        let taken: usize = producers.into_iter().map(|p| p.join().unwrap()).sum();
        compactor.join().unwrap();

        assert_eq!(recount(&queue), queue.total_count());
        let remaining: usize = (0..3).map(|n| queue.remove_all(NodeId(n)).len()).sum();
        assert_eq!(taken + remaining, 2_000);
        assert_eq!(queue.total_count(), 0);
    }
}
