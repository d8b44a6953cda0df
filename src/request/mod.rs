//! Request primitives for the client core.
//!
//! [`RequestScope`] bounds a future with its own deadline and cancellation token.
//! [`Generation`] hands out tickets so a loader can tell whether a response still
//! belongs to the most recent request.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::ClientError;

/// A deadline plus a cancellation token for one logical request.
#[derive(Debug, Clone)]
pub struct RequestScope {
    deadline: Instant,
    timeout: Duration,
    cancel: CancellationToken,
}

impl RequestScope {
    /// Scope that expires `timeout` from now.
    pub fn new(timeout: Duration) -> Self {
        Self::with_token(timeout, CancellationToken::new())
    }

    /// Scope sharing an existing cancellation token.
    pub fn with_token(timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            timeout,
            cancel,
        }
    }

    /// Child scope with its own deadline, cancelled together with this one.
    pub fn child(&self, timeout: Duration) -> Self {
        Self::with_token(timeout, self.cancel.child_token())
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drive `fut` until it resolves, the deadline passes, or the scope is cancelled.
    ///
    /// On timeout the inner future is dropped; the transport may still finish the
    /// request, but its result is never observed.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ClientError::Cancelled),
            _ = tokio::time::sleep_until(self.deadline) => Err(ClientError::Timeout(self.timeout)),
            result = fut => result.map_err(|e| match e {
                // reqwest does not know our deadline
                ClientError::Timeout(d) if d.is_zero() => ClientError::Timeout(self.timeout),
                other => other,
            }),
        }
    }
}

/// Monotonic request counter.
#[derive(Debug, Default)]
pub struct Generation {
    current: AtomicU64,
}

/// Snapshot of a [`Generation`] taken when a request started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a request, superseding every earlier ticket.
    pub fn begin(&self) -> Ticket {
        Ticket(self.current.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Supersede every outstanding ticket without starting a request.
    pub fn invalidate(&self) {
        self.current.fetch_add(1, Ordering::AcqRel);
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.current.load(Ordering::Acquire) == ticket.0
    }
}
