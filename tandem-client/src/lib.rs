//! # Tandem Client
//!
//! Poll-cycle orchestration for pipelined request/response traffic.
//!
//! ## Overview
//!
//! - **`PipeliningClient`**: thread-safe front end; submit from any thread,
//!   drive I/O from whichever thread polls
//! - **`Transport`**: the connection pool contract the client drives
//! - **`MockTransport`**: scriptable in-memory transport for tests and
//!   benchmarks
//!
//! ## Quick Start
//!
//! ```rust
//! use tandem_client::mock::MockTransport;
//! use tandem_client::PipeliningClient;
//! use tandem_core::prelude::*;
//! use std::time::Duration;
//!
//! let (transport, handle) = MockTransport::new();
//! handle.set_echo(true);
//! let client = PipeliningClient::new(transport, ClientOptions::default());
//!
//! let future = client.submit(NodeId(1), RequestBuilder::new("ping"));
//! assert!(client.poll_until_timeout(&future, Duration::from_secs(1)).unwrap());
//! assert!(future.succeeded());
//! ```

#![deny(unsafe_code)]
// Allow some pedantic lints
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::needless_pass_by_value)]

pub mod client;
pub mod mock;
pub mod transport;

pub use client::{PipeliningClient, PollCondition};
pub use transport::{Transport, TransportEvent, TransportWaker};

pub mod prelude {
    pub use crate::client::{PipeliningClient, PollCondition};
    pub use crate::mock::{MockHandle, MockTransport, SentRecord};
    pub use crate::transport::{Transport, TransportEvent, TransportWaker};
    pub use tandem_core::prelude::*;
}
