//! Timeout middleware for operators.
//!
//! Runs each call under a child context whose deadline is at most the
//! configured duration away, and fails it with `OpError::Timeout` once that
//! deadline passes. The child context is cancelled when the call returns so
//! anything the operator spawned against it winds down too.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use repokeeper_core::{OpError, OpInput, OpOutput};
use tower::Layer;

use super::Middleware;
use crate::context::OpContext;
use crate::operator::{BoxedOperator, Operator};

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// A zero duration disables the layer: the operator is returned as is.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutLayer {
    timeout: Duration,
}

impl TimeoutLayer {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Layer<BoxedOperator> for TimeoutLayer {
    type Service = BoxedOperator;

    fn layer(&self, inner: BoxedOperator) -> BoxedOperator {
        if self.timeout.is_zero() {
            return inner;
        }
        Arc::new(TimeoutOperator {
            inner,
            timeout: self.timeout,
        })
    }
}

/// Bound every call to `timeout`. `Duration::ZERO` passes calls through.
///
/// The call's context carries the deadline, so cooperative operators can stop
/// on their own. When the deadline passes the operator's future is dropped
/// regardless; an operator that ignores its context is abandoned wherever it
/// was suspended and may leave side effects half-finished.
pub fn with_timeout(timeout: Duration) -> Middleware {
    Arc::new(TimeoutLayer::new(timeout))
}

// ---------------------------------------------------------------------------
// TimeoutOperator
// ---------------------------------------------------------------------------

struct TimeoutOperator {
    inner: BoxedOperator,
    timeout: Duration,
}

#[async_trait]
impl Operator for TimeoutOperator {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn version(&self) -> &str {
        self.inner.version()
    }

    async fn run(&self, ctx: &OpContext, input: &OpInput) -> Result<OpOutput, OpError> {
        let child = ctx.with_timeout(self.timeout);
        let _release = child.token().clone().drop_guard();
        let Some(deadline) = child.deadline() else {
            // No representable deadline: nothing to enforce.
            return self.inner.run(&child, input).await;
        };

        match tokio::time::timeout_at(deadline, self.inner.run(&child, input)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(OpError::Timeout),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
