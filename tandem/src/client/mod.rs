//! Pipelining client and transport contract.
//!
//! # Types
//!
//! - [`PipeliningClient`] - thread-safe submit/poll front end
//! - [`Transport`] - connection pool contract the client drives
//! - [`MockTransport`] - scriptable in-memory transport
//!
//! # Example
//!
//! ```rust
//! use tandem::client::prelude::*;
//!
//! let (transport, handle) = MockTransport::new();
//! handle.set_echo(true);
//! let client = PipeliningClient::new(transport, ClientOptions::default());
//!
//! let futures: Vec<_> = (0..3)
//!     .map(|i| client.submit(NodeId(1), RequestBuilder::new(format!("req-{i}"))))
//!     .collect();
//! for future in &futures {
//!     client.poll_until(future).unwrap();
//! }
//! assert!(futures.iter().all(ResponseFuture::succeeded));
//! ```

pub use tandem_client::mock::{MockHandle, MockTransport, SentRecord};
pub use tandem_client::{PipeliningClient, PollCondition, Transport, TransportEvent, TransportWaker};

/// Convenient imports for the pipelining client.
///
/// # Example
///
/// ```rust
/// use tandem::client::prelude::*;
///
/// // Now you have:
/// // - PipeliningClient, Transport, MockTransport
/// // - ClientOptions, NodeId, RequestBuilder, ResponseFuture
/// // - RequestError, PollError
/// ```
pub mod prelude {
    pub use super::{
        MockHandle, MockTransport, PipeliningClient, PollCondition, Transport, TransportEvent,
        TransportWaker,
    };
    pub use crate::{
        AuthenticationError, ClientOptions, ClientResponse, Clock, ManualClock, NodeId, PollError,
        RequestBuilder, RequestError, ResponseFuture, SystemClock,
    };
    pub use bytes::Bytes;
}
