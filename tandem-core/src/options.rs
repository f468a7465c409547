//! Client configuration options
//!
//! This module provides the knobs that bound the poll cycle: request
//! timeouts, the blocking clamp, and the per-node pipelining cap.

use std::time::Duration;

/// Hard upper bound on a single blocking poll, regardless of configuration.
///
/// Guarantees that cancellation and interruption are observed periodically
/// even when a caller asks to wait "forever".
pub const MAX_POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Client configuration options.
///
/// # Examples
///
/// ```
/// use tandem_core::options::ClientOptions;
/// use std::time::Duration;
///
/// let opts = ClientOptions::default()
///     .with_request_timeout(Duration::from_secs(10))
///     .with_max_in_flight_per_node(2);
/// assert_eq!(opts.max_in_flight_per_node, 2);
/// ```
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Default request timeout
    ///
    /// Applied to requests whose builder does not carry its own timeout.
    /// Covers both time spent pending and time spent in flight.
    /// - Default: 30 seconds
    pub request_timeout: Duration,

    /// Retry backoff
    ///
    /// Upper bound on a blocking poll while nothing is in flight anywhere,
    /// so a client with only unsendable requests re-checks readiness soon.
    /// - Default: 100ms
    pub retry_backoff: Duration,

    /// Maximum blocking poll
    ///
    /// Absolute cap on one blocking transport poll. Clamped to
    /// [`MAX_POLL_TIMEOUT`].
    /// - Default: 5 seconds
    pub max_poll_timeout: Duration,

    /// Maximum in-flight requests per node
    ///
    /// Number of requests that may be pipelined to one node before earlier
    /// ones complete. Values below 1 are raised to 1.
    /// - Default: 5
    pub max_in_flight_per_node: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_millis(100),
            max_poll_timeout: MAX_POLL_TIMEOUT,
            max_in_flight_per_node: 5,
        }
    }
}

impl ClientOptions {
    /// Create new client options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the retry backoff.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set the maximum blocking poll.
    ///
    /// Values above [`MAX_POLL_TIMEOUT`] are clamped.
    ///
    /// ```
    /// use tandem_core::options::{ClientOptions, MAX_POLL_TIMEOUT};
    /// use std::time::Duration;
    ///
    /// let opts = ClientOptions::new().with_max_poll_timeout(Duration::from_secs(60));
    /// assert_eq!(opts.max_poll_timeout, MAX_POLL_TIMEOUT);
    /// ```
    pub fn with_max_poll_timeout(mut self, timeout: Duration) -> Self {
        self.max_poll_timeout = timeout.min(MAX_POLL_TIMEOUT);
        self
    }

    /// Set the per-node pipelining cap.
    pub fn with_max_in_flight_per_node(mut self, max: usize) -> Self {
        self.max_in_flight_per_node = max.max(1);
        self
    }
}
