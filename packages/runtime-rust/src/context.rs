//! Per-call cancellation and deadline carrier.

use std::time::Duration;

use repokeeper_core::OpError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Context handed to every [`Operator::run`](crate::Operator::run).
///
/// Cancellation flows from parent to child: cancelling a context cancels all
/// contexts derived from it, never the other way around. A deadline only ever
/// shrinks when deriving.
///
/// Operators honour the context cooperatively, typically by selecting on
/// [`done`](Self::done) next to their own I/O.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl OpContext {
    /// Root context without a deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Root context driven by an externally owned token.
    #[must_use]
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Derive a context that is cancelled with `self` but can also be cancelled alone.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derive a child whose deadline is at most `timeout` from now.
    ///
    /// A `timeout` too large to represent as an instant leaves the inherited
    /// deadline, if any, in place.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut child = self.child();
        child.deadline = match (self.deadline, Instant::now().checked_add(timeout)) {
            (Some(existing), Some(candidate)) => Some(existing.min(candidate)),
            (existing, None) => existing,
            (None, candidate) => candidate,
        };
        child
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Why the context has ended, or `None` while it is still live.
    #[must_use]
    pub fn err(&self) -> Option<OpError> {
        if self.token.is_cancelled() {
            return Some(OpError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(OpError::Timeout),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> OpError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                () = self.token.cancelled() => OpError::Canceled,
                () = tokio::time::sleep_until(deadline) => OpError::Timeout,
            },
            None => {
                self.token.cancelled().await;
                OpError::Canceled
            }
        }
    }
}
