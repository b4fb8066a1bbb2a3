//! Retry middleware with exponential backoff and jitter.
//!
//! The only layer that recovers from errors locally. After the final attempt
//! the last error is returned unchanged.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use repokeeper_core::{OpError, OpInput, OpOutput};
use tower::Layer;

use super::Middleware;
use crate::context::OpContext;
use crate::operator::{BoxedOperator, Operator};

/// Fallback base delay when none is configured.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);

/// Decides whether a failed attempt should be retried.
pub type RetryPredicate = Arc<dyn Fn(&OpError) -> bool + Send + Sync>;

/// Delay before retry number `attempt + 1`: `base * 2^attempt` plus a jitter
/// drawn uniformly from `[0, delay / 3]`.
#[must_use]
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let delay = base.saturating_mul(2u32.saturating_pow(attempt));
    let max_jitter = delay / 3;
    if max_jitter.is_zero() {
        return delay;
    }
    delay.saturating_add(rand::rng().random_range(Duration::ZERO..=max_jitter))
}

/// Retries everything except budget exhaustion, cancellation and deadline expiry.
#[must_use]
pub fn default_should_retry() -> RetryPredicate {
    Arc::new(OpError::is_retryable)
}

// ---------------------------------------------------------------------------
// RetryLayer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RetryLayer {
    max_attempts: u32,
    base: Duration,
    should_retry: RetryPredicate,
}

impl RetryLayer {
    /// `max_attempts` below 1 becomes 1, a zero `base` becomes 200ms, and a
    /// missing predicate falls back to [`default_should_retry`].
    #[must_use]
    pub fn new(max_attempts: u32, base: Duration, should_retry: Option<RetryPredicate>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base: if base.is_zero() {
                DEFAULT_BASE_DELAY
            } else {
                base
            },
            should_retry: should_retry.unwrap_or_else(default_should_retry),
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn base(&self) -> Duration {
        self.base
    }
}

impl Layer<BoxedOperator> for RetryLayer {
    type Service = BoxedOperator;

    fn layer(&self, inner: BoxedOperator) -> BoxedOperator {
        Arc::new(RetryOperator {
            inner,
            policy: self.clone(),
        })
    }
}

/// Retry failed calls up to `max_attempts` times in total.
pub fn with_retry(
    max_attempts: u32,
    base: Duration,
    should_retry: Option<RetryPredicate>,
) -> Middleware {
    Arc::new(RetryLayer::new(max_attempts, base, should_retry))
}

// ---------------------------------------------------------------------------
// RetryOperator
// ---------------------------------------------------------------------------

struct RetryOperator {
    inner: BoxedOperator,
    policy: RetryLayer,
}

#[async_trait]
impl Operator for RetryOperator {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn version(&self) -> &str {
        self.inner.version()
    }

    async fn run(&self, ctx: &OpContext, input: &OpInput) -> Result<OpOutput, OpError> {
        let mut attempt: u32 = 0;
        loop {
            let err = match self.inner.run(ctx, input).await {
                Ok(output) => return Ok(output),
                Err(err) => err,
            };

            attempt += 1;
            if attempt >= self.policy.max_attempts || !(self.policy.should_retry)(&err) {
                return Err(err);
            }

            let delay = backoff_delay(self.policy.base, attempt - 1);
            tracing::warn!(
                operator = %self.inner.name(),
                attempt = attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "operator failed, retrying"
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                reason = ctx.done() => return Err(reason),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
