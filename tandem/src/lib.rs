//! # Tandem
//!
//! A thread-safe request pipelining layer over a non-blocking transport.
//!
//! ## Architecture
//!
//! - **`tandem-core`**: request bookkeeping (pending queues, in-flight
//!   tracking, one-shot futures, the completion relay)
//! - **`tandem-client`**: the poll-cycle orchestrator and transport contract
//! - **`tandem`**: public API surface (this crate)
//!
//! Any number of threads may submit requests. Whichever thread polls drives
//! the transport: it moves pending requests into flight while each node has
//! pipelining capacity, matches responses to requests in send order, and
//! fails requests that expire or lose their connection. Callbacks always
//! run outside the client's lock.
//!
//! ## Features
//!
//! - **`client`** (default) - `PipeliningClient`, `Transport` and the
//!   in-memory `MockTransport`
//!
//! ## Quick Start
//!
//! ```rust
//! # #[cfg(feature = "client")]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use tandem::client::prelude::*;
//! use std::time::Duration;
//!
//! let (transport, handle) = MockTransport::new();
//! let client = PipeliningClient::new(transport, ClientOptions::default());
//!
//! // Submitting never blocks; nothing is sent until someone polls
//! let reply = client.submit(NodeId(1), RequestBuilder::new("metadata"));
//! client.poll_once(Duration::ZERO)?;
//!
//! // The transport delivers a response for the oldest in-flight request
//! handle.respond(NodeId(1), "brokers: 3");
//! client.poll_until(&reply)?;
//!
//! assert_eq!(reply.value().unwrap().body.unwrap(), "brokers: 3");
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "client"))]
//! # fn main() {}
//! ```
//!
//! ## Failure model
//!
//! - Per-request failures (timeout, disconnect, authentication, version
//!   mismatch) resolve the request's [`ResponseFuture`] with a
//!   [`RequestError`]
//! - Poll-level conditions (cancellation, interruption, closed client,
//!   bookkeeping defects) return [`PollError`] from the poll call

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use bytes::Bytes;

pub use tandem_core::clock::{Clock, ManualClock, SystemClock};
pub use tandem_core::error::{AuthenticationError, PollError, RequestError};
pub use tandem_core::future::ResponseFuture;
pub use tandem_core::interrupt::{self, InterruptHandle};
pub use tandem_core::options::{ClientOptions, MAX_POLL_TIMEOUT};
pub use tandem_core::request::{ClientRequest, ClientResponse, NodeId, RequestBuilder, RequestHeader};

/// Opt-in `tracing` output for tests and benches.
pub mod dev_tracing;

#[cfg(feature = "client")]
pub mod client;
