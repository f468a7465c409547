//! One-shot result cell bridging I/O completion to waiting or callback-driven
//! consumers.
//!
//! A cell is created as a pair: the [`Completer`] is the single writer and is
//! consumed by the transition, the [`ResponseFuture`] is a cloneable reader.
//!
//! ```text
//! PENDING ──complete(v)──▶ SUCCEEDED(v)
//!    │
//!    └─────fail(e)───────▶ FAILED(e)
//! ```
//!
//! Listeners run on the resolving thread, after the cell's own lock has been
//! released, so a listener may freely submit new work or inspect the future.

use crate::error::RequestError;
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

type Listener<T> = Box<dyn FnOnce(&Result<T, RequestError>) + Send>;

enum State<T> {
    Pending,
    Succeeded(T),
    Failed(RequestError),
}

impl<T: Clone> State<T> {
    fn result(&self) -> Option<Result<T, RequestError>> {
        match self {
            State::Pending => None,
            State::Succeeded(v) => Some(Ok(v.clone())),
            State::Failed(e) => Some(Err(e.clone())),
        }
    }
}

struct Inner<T> {
    state: State<T>,
    // Most futures carry zero or one listener
    listeners: SmallVec<[Listener<T>; 1]>,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    done: Condvar,
}

impl<T: Clone> Shared<T> {
    fn resolve(&self, result: Result<T, RequestError>) {
        let listeners = {
            let mut inner = self.inner.lock();
            assert!(
                matches!(inner.state, State::Pending),
                "future resolved twice"
            );
            inner.state = match &result {
                Ok(v) => State::Succeeded(v.clone()),
                Err(e) => State::Failed(e.clone()),
            };
            std::mem::take(&mut inner.listeners)
        };
        self.done.notify_all();

        for listener in listeners {
            listener(&result);
        }
    }
}

/// Create a linked completer/future pair.
#[must_use]
pub fn pair<T: Clone>() -> (Completer<T>, ResponseFuture<T>) {
    let shared = Arc::new(Shared {
        inner: Mutex::new(Inner {
            state: State::Pending,
            listeners: SmallVec::new(),
        }),
        done: Condvar::new(),
    });
    (
        Completer {
            shared: shared.clone(),
        },
        ResponseFuture { shared },
    )
}

/// Write half of a one-shot cell.
///
/// Resolving consumes the completer, so a second resolution cannot be written.
pub struct Completer<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Clone> Completer<T> {
    /// Resolve successfully.
    pub fn complete(self, value: T) {
        self.shared.resolve(Ok(value));
    }

    /// Resolve with a failure.
    pub fn fail(self, error: RequestError) {
        self.shared.resolve(Err(error));
    }

    /// Resolve with either outcome.
    pub fn resolve(self, result: Result<T, RequestError>) {
        self.shared.resolve(result);
    }
}

impl<T> fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer").finish_non_exhaustive()
    }
}

/// Read half of a one-shot cell.
pub struct ResponseFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ResponseFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone> ResponseFuture<T> {
    /// An already-succeeded future.
    #[must_use]
    pub fn completed(value: T) -> Self {
        let (completer, future) = pair();
        completer.complete(value);
        future
    }

    /// An already-failed future.
    #[must_use]
    pub fn failed_with(error: RequestError) -> Self {
        let (completer, future) = pair();
        completer.fail(error);
        future
    }

    /// Whether the future reached a terminal state.
    pub fn is_done(&self) -> bool {
        !matches!(self.shared.inner.lock().state, State::Pending)
    }

    /// Whether the future resolved with a value.
    pub fn succeeded(&self) -> bool {
        matches!(self.shared.inner.lock().state, State::Succeeded(_))
    }

    /// Whether the future resolved with an error.
    pub fn failed(&self) -> bool {
        matches!(self.shared.inner.lock().state, State::Failed(_))
    }

    /// The value, if succeeded.
    pub fn value(&self) -> Option<T> {
        match &self.shared.inner.lock().state {
            State::Succeeded(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// The error, if failed.
    pub fn error(&self) -> Option<RequestError> {
        match &self.shared.inner.lock().state {
            State::Failed(e) => Some(e.clone()),
            _ => None,
        }
    }

    /// The terminal result, if any.
    pub fn result(&self) -> Option<Result<T, RequestError>> {
        self.shared.inner.lock().state.result()
    }

    /// Register a callback invoked exactly once with the terminal result.
    ///
    /// Runs immediately on the calling thread if the future is already done.
    pub fn add_listener<F>(&self, listener: F)
    where
        F: FnOnce(&Result<T, RequestError>) + Send + 'static,
    {
        let mut inner = self.shared.inner.lock();
        match inner.state.result() {
            Some(result) => {
                drop(inner);
                listener(&result);
            }
            None => inner.listeners.push(Box::new(listener)),
        }
    }

    /// Derive a future resolved by applying `f` to this one's value.
    ///
    /// Errors pass through unchanged.
    pub fn map<U, F>(&self, f: F) -> ResponseFuture<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
        T: Send + 'static,
    {
        let (completer, mapped) = pair();
        self.add_listener(move |result| match result {
            Ok(v) => completer.complete(f(v.clone())),
            Err(e) => completer.fail(e.clone()),
        });
        mapped
    }

    /// Block the calling thread until the future resolves.
    ///
    /// This does not drive any I/O; something else must be polling.
    pub fn wait(&self) -> Result<T, RequestError> {
        let mut inner = self.shared.inner.lock();
        loop {
            if let Some(result) = inner.state.result() {
                return result;
            }
            self.shared.done.wait(&mut inner);
        }
    }

    /// Block until the future resolves or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, RequestError>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.shared.inner.lock();
        loop {
            if let Some(result) = inner.state.result() {
                return Some(result);
            }
            if self.shared.done.wait_until(&mut inner, deadline).timed_out() {
                return inner.state.result();
            }
        }
    }
}

impl<T> fmt::Debug for ResponseFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.shared.inner.lock().state {
            State::Pending => "pending",
            State::Succeeded(_) => "succeeded",
            State::Failed(_) => "failed",
        };
        f.debug_struct("ResponseFuture").field("state", &state).finish()
    }
}
