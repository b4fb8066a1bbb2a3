//! Operator middleware.
//!
//! A [`Middleware`] is a `tower::Layer` from operator to operator. Layers are
//! composed with [`chain`]; the first layer in the list is the outermost wrapper.
//!
//! - [`meter`]: duration and outcome recording
//! - [`timeout`]: per-call deadline
//! - [`retry`]: exponential backoff with jitter
//! - [`budget`]: cumulative cost ceiling
//! - [`cache`]: result caching keyed by call identity
//! - [`pipeline`]: the standard stack built from configuration

use std::sync::Arc;

use tower::layer::layer_fn;
use tower::Layer;

use crate::operator::BoxedOperator;

pub mod budget;
pub mod cache;
pub mod meter;
pub mod pipeline;
pub mod retry;
pub mod timeout;

pub use budget::{metric_cost, with_budget, Budget, BudgetLayer, CostFn};
pub use cache::{
    with_cache, BoundedCache, CacheKeyFn, CacheLayer, CacheStore, MemoryCache, CACHE_HIT_METRIC,
};
pub use meter::{with_meter, MeterLayer, MeterRecord, Recorder};
pub use pipeline::{build_pipeline, Pipeline};
pub use retry::{backoff_delay, with_retry, RetryLayer, RetryPredicate};
pub use timeout::{with_timeout, TimeoutLayer};

/// Shared, type-erased operator decorator.
pub type Middleware = Arc<dyn Layer<BoxedOperator, Service = BoxedOperator> + Send + Sync>;

/// Wrap `op` with `middlewares`, applied right-to-left.
///
/// `chain(op, &[a, b])` yields `a(b(op))`: `a` sees the call first and the
/// result last. With `[with_meter(r), with_retry(..)]` the recorded duration
/// covers every retry; in the opposite order only the final attempt.
#[must_use]
pub fn chain(op: BoxedOperator, middlewares: &[Middleware]) -> BoxedOperator {
    middlewares
        .iter()
        .rev()
        .fold(op, |inner, middleware| middleware.layer(inner))
}

/// Turn a plain `Fn(BoxedOperator) -> BoxedOperator` into a [`Middleware`].
pub fn middleware_fn<F>(f: F) -> Middleware
where
    F: Fn(BoxedOperator) -> BoxedOperator + Send + Sync + 'static,
{
    Arc::new(layer_fn(f))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------


#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use repokeeper_core::{OpError, OpInput, OpOutput};

    use super::test_support::{input, FlakyOp};
    use super::*;
    use crate::context::OpContext;
    use crate::operator::Operator;

    /// Wrapper that logs entry and exit under a tag.
    struct Tagged {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        inner: BoxedOperator,
    }

    #[async_trait]
    impl Operator for Tagged {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn version(&self) -> &str {
            self.inner.version()
        }

        async fn run(&self, ctx: &OpContext, input: &OpInput) -> Result<OpOutput, OpError> {
            self.log.lock().push(format!("enter:{}", self.tag));
            let result = self.inner.run(ctx, input).await;
            self.log.lock().push(format!("exit:{}", self.tag));
            result
        }
    }

    fn tagged(tag: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Middleware {
        let log = Arc::clone(log);
        middleware_fn(move |inner| {
            Arc::new(Tagged {
                tag,
                log: Arc::clone(&log),
                inner,
            }) as BoxedOperator
        })
    }

    #[tokio::test]
    async fn first_middleware_is_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (op, _) = FlakyOp::new(0);
        let chained = chain(Arc::new(op), &[tagged("a", &log), tagged("b", &log)]);

        chained.run(&OpContext::new(), &input()).await.unwrap();

        assert_eq!(
            log.lock().clone(),
            vec!["enter:a", "enter:b", "exit:b", "exit:a"]
        );
    }

    #[tokio::test]
    async fn chain_preserves_identity() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (op, _) = FlakyOp::new(0);
        let chained = chain(Arc::new(op), &[tagged("a", &log)]);
        assert_eq!(chained.name(), "flaky");
        assert_eq!(chained.version(), "1.0.0");
    }

    #[tokio::test]
    async fn empty_chain_returns_operator_unchanged() {
        let (op, calls) = FlakyOp::new(0);
        let op: BoxedOperator = Arc::new(op);
        let chained = chain(Arc::clone(&op), &[]);
        assert!(Arc::ptr_eq(&op, &chained));
        chained.run(&OpContext::new(), &input()).await.unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
