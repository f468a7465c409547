//! Tandem Core
//!
//! This crate contains the runtime-agnostic request bookkeeping:
//! - Requests, responses and node ids (`request`)
//! - One-shot response futures (`future`)
//! - Per-node in-flight tracking with a pipelining cap (`in_flight`)
//! - Per-node pending queues with expiry and compaction (`pending`)
//! - Completion hand-off outside the client lock (`relay`)
//! - Time source abstraction (`clock`)
//! - Per-thread interruption flags (`interrupt`)
//! - Client options (`options`)
//! - Error types (`error`)

#![deny(unsafe_code)]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]
pub mod clock;
pub mod error;
pub mod future;
pub mod in_flight;
pub mod interrupt;
pub mod options;
pub mod pending;
pub mod relay;
pub mod request;

// Optional: a small prelude to make downstream crates ergonomic.
// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::error::{AuthenticationError, EmptyQueue, PollError, RequestError};
    pub use crate::future::{Completer, ResponseFuture};
    pub use crate::in_flight::{InFlightCounter, InFlightTracker};
    pub use crate::interrupt::InterruptHandle;
    pub use crate::options::{ClientOptions, MAX_POLL_TIMEOUT};
    pub use crate::pending::{PendingCursor, PendingQueue};
    pub use crate::relay::{CompletionHandler, CompletionRelay};
    pub use crate::request::{ClientRequest, ClientResponse, NodeId, RequestBuilder, RequestHeader};
}
