//! In-flight request tracking.
//!
//! Per node, requests that were handed to the transport but have not
//! completed yet, kept in send order:
//!
//! ```text
//!   oldest ──────────────────────────────▶ newest
//!   [front] req1  req2  req3  req4 [back]
//!      ▲                             ▲
//!   complete_oldest            add / peek_newest / complete_newest
//! ```
//!
//! Queue contents are mutated only by the thread holding the client's main
//! lock. The aggregate count is atomic and can be shared through an
//! [`InFlightCounter`] for lock-free reads.

use crate::error::EmptyQueue;
use crate::request::{ClientRequest, NodeId};
use hashbrown::HashMap;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Read-only view of the tracker's total in-flight count.
#[derive(Debug, Clone)]
pub struct InFlightCounter(Arc<AtomicUsize>);

impl InFlightCounter {
    #[inline]
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }
}

/// Bounded per-node queues of in-flight requests.
#[derive(Debug)]
pub struct InFlightTracker {
    max_per_node: usize,
    requests: HashMap<NodeId, VecDeque<ClientRequest>>,
    total: Arc<AtomicUsize>,
}

impl InFlightTracker {
    pub fn new(max_per_node: usize) -> Self {
        Self {
            max_per_node: max_per_node.max(1),
            requests: HashMap::new(),
            total: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Pipelining cap per node.
    #[inline]
    pub const fn max_per_node(&self) -> usize {
        self.max_per_node
    }

    /// Shareable handle to the total count.
    pub fn counter(&self) -> InFlightCounter {
        InFlightCounter(self.total.clone())
    }

    /// Track a request as the newest in flight to its node.
    ///
    /// Capacity is not checked here; callers gate on [`can_send_more`].
    ///
    /// [`can_send_more`]: Self::can_send_more
    pub fn add(&mut self, request: ClientRequest) {
        self.requests
            .entry(request.node())
            .or_default()
            .push_back(request);
        self.total.fetch_add(1, Ordering::AcqRel);
    }

    /// Whether another request may be pipelined to `node`.
    ///
    /// True when nothing is in flight, or when the newest request has fully
    /// left the wire and the cap is not reached. Writes complete in send
    /// order, so a transmitted newest request implies every older one is
    /// transmitted too.
    pub fn can_send_more(&self, node: NodeId) -> bool {
        match self.requests.get(&node) {
            None => true,
            Some(queue) => match queue.back() {
                None => true,
                Some(newest) => newest.is_transmitted() && queue.len() < self.max_per_node,
            },
        }
    }

    fn queue_mut(&mut self, node: NodeId) -> Result<&mut VecDeque<ClientRequest>, EmptyQueue> {
        match self.requests.get_mut(&node) {
            Some(queue) if !queue.is_empty() => Ok(queue),
            _ => Err(EmptyQueue { node }),
        }
    }

    /// Remove the earliest-sent request; used for normal response handling.
    pub fn complete_oldest(&mut self, node: NodeId) -> Result<ClientRequest, EmptyQueue> {
        let request = self.queue_mut(node)?.pop_front().ok_or(EmptyQueue { node })?;
        self.total.fetch_sub(1, Ordering::AcqRel);
        Ok(request)
    }

    /// Remove the most recently sent request.
    pub fn complete_newest(&mut self, node: NodeId) -> Result<ClientRequest, EmptyQueue> {
        let request = self.queue_mut(node)?.pop_back().ok_or(EmptyQueue { node })?;
        self.total.fetch_sub(1, Ordering::AcqRel);
        Ok(request)
    }

    /// The most recently sent request.
    pub fn peek_newest(&self, node: NodeId) -> Result<&ClientRequest, EmptyQueue> {
        self.requests
            .get(&node)
            .and_then(VecDeque::back)
            .ok_or(EmptyQueue { node })
    }

    /// The most recently sent request, mutably.
    pub fn peek_newest_mut(&mut self, node: NodeId) -> Result<&mut ClientRequest, EmptyQueue> {
        self.queue_mut(node)?.back_mut().ok_or(EmptyQueue { node })
    }

    pub fn count_for(&self, node: NodeId) -> usize {
        self.requests.get(&node).map_or(0, VecDeque::len)
    }

    #[inline]
    pub fn total_count(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    pub fn is_empty_for(&self, node: NodeId) -> bool {
        self.count_for(node) == 0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.total_count() == 0
    }

    /// Remove every request in flight to `node`, newest first.
    ///
    /// Used when the connection drops. A node with nothing in flight yields
    /// an empty batch and leaves the counters untouched.
    pub fn drain_all(&mut self, node: NodeId) -> Vec<ClientRequest> {
        let Some(queue) = self.requests.remove(&node) else {
            return Vec::new();
        };
        self.total.fetch_sub(queue.len(), Ordering::AcqRel);
        queue.into_iter().rev().collect()
    }

    /// Nodes that currently have requests in flight.
    pub fn nodes(&self) -> SmallVec<[NodeId; 4]> {
        self.requests
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(node, _)| *node)
            .collect()
    }

    /// Nodes with at least one request in flight longer than its timeout.
    pub fn expired_endpoints(&self, now: Instant) -> SmallVec<[NodeId; 4]> {
        self.requests
            .iter()
            .filter(|(_, queue)| queue.iter().any(|r| r.is_send_expired(now)))
            .map(|(node, _)| *node)
            .collect()
    }
}
