//! Pipeline composition: the standard middleware stack built from configuration.

use std::sync::Arc;

use super::budget::{metric_cost, with_budget, Budget, CostFn};
use super::cache::{with_cache, BoundedCache, CacheStore};
use super::meter::{with_meter, Recorder};
use super::retry::with_retry;
use super::timeout::with_timeout;
use super::Middleware;
use crate::config::RuntimeConfig;

/// Metric read as a call's cost when no cost function is supplied.
pub const COST_METRIC: &str = "cost";

/// The configured middleware stack plus handles to its shared state.
pub struct Pipeline {
    middlewares: Vec<Middleware>,
    budget: Option<Arc<Budget>>,
    cache: Option<Arc<dyn CacheStore>>,
}

impl Pipeline {
    /// Layers in order, outermost first.
    #[must_use]
    pub fn middlewares(&self) -> &[Middleware] {
        &self.middlewares
    }

    /// Ledger behind the budget layer, if budgeting is enabled.
    #[must_use]
    pub fn budget(&self) -> Option<&Arc<Budget>> {
        self.budget.as_ref()
    }

    /// Store behind the cache layer, if caching is enabled.
    #[must_use]
    pub fn cache(&self) -> Option<&Arc<dyn CacheStore>> {
        self.cache.as_ref()
    }
}

/// Build the standard middleware stack.
///
/// Layer order (outermost to innermost):
/// 1. meter -- observes the whole call, cache hits and retries included
/// 2. cache -- a hit skips budget, retries and the operator
/// 3. budget -- charged once per successful call, not per attempt
/// 4. retry -- backoff between attempts
/// 5. timeout -- bounds each attempt separately
///
/// Cache and budget are only present when configured. `cost_fn` defaults to
/// the output's `cost` metric.
#[must_use]
pub fn build_pipeline(
    config: &RuntimeConfig,
    recorder: Arc<dyn Recorder>,
    cost_fn: Option<CostFn>,
) -> Pipeline {
    let mut middlewares = vec![with_meter(recorder)];

    let cache = config.cache_capacity.map(|capacity| {
        let store: Arc<dyn CacheStore> = Arc::new(BoundedCache::new(capacity));
        middlewares.push(with_cache(Arc::clone(&store), None));
        store
    });

    let budget = config.budget_max.map(|max| {
        let budget = Arc::new(Budget::new(max));
        let cost_fn = cost_fn.unwrap_or_else(|| metric_cost(COST_METRIC));
        middlewares.push(with_budget(Arc::clone(&budget), cost_fn));
        budget
    });

    middlewares.push(with_retry(
        config.retry_max_attempts,
        config.retry_base_delay(),
        None,
    ));
    middlewares.push(with_timeout(config.operation_timeout()));

    Pipeline {
        middlewares,
        budget,
        cache,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use parking_lot::Mutex;
    use repokeeper_core::Metric;

    use super::super::chain;
    use super::super::meter::MeterRecord;
    use super::super::test_support::{input, FlakyOp};
    use super::*;
    use crate::context::OpContext;

    fn recorder() -> (Arc<dyn Recorder>, Arc<Mutex<Vec<MeterRecord>>>) {
        let records = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&records);
        (
            Arc::new(move |r: &MeterRecord| sink.lock().push(r.clone())),
            records,
        )
    }

    #[test]
    fn default_config_has_meter_retry_timeout() {
        let (rec, _) = recorder();
        let pipeline = build_pipeline(&RuntimeConfig::default(), rec, None);
        assert_eq!(pipeline.middlewares().len(), 3);
        assert!(pipeline.budget().is_none());
        assert!(pipeline.cache().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn full_stack_meters_cache_hits_and_retries() {
        let config = RuntimeConfig {
            retry_base_delay_ms: 10,
            cache_capacity: Some(16),
            budget_max: Some(100.0),
            ..RuntimeConfig::default()
        };
        let (rec, records) = recorder();
        let pipeline = build_pipeline(&config, rec, None);
        assert_eq!(pipeline.middlewares().len(), 5);

        let (op, calls) = FlakyOp::new(2);
        let op = chain(Arc::new(op), pipeline.middlewares());

        op.run(&OpContext::new(), &input()).await.unwrap();
        let cached = op.run(&OpContext::new(), &input()).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(cached.metric("cache_hit").is_some());
        assert_eq!(pipeline.cache().unwrap().len(), 1);

        let records = records.lock();
        assert_eq!(records.len(), 2);
        assert!(records[0].duration_ms >= 30);
        assert!(records[0].cache_hit.abs() < f64::EPSILON);
        assert!((records[1].cache_hit - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn default_cost_reads_cost_metric() {
        struct Costly;

        #[async_trait::async_trait]
        impl crate::operator::Operator for Costly {
            fn name(&self) -> &str {
                "costly"
            }
            fn version(&self) -> &str {
                "1"
            }
            async fn run(
                &self,
                _ctx: &OpContext,
                _input: &repokeeper_core::OpInput,
            ) -> Result<repokeeper_core::OpOutput, repokeeper_core::OpError> {
                let mut out = repokeeper_core::OpOutput::default();
                out.push_metric(Metric::new(COST_METRIC, 4.0));
                Ok(out)
            }
        }

        let config = RuntimeConfig {
            budget_max: Some(10.0),
            ..RuntimeConfig::default()
        };
        let (rec, _) = recorder();
        let pipeline = build_pipeline(&config, rec, None);
        let op = chain(Arc::new(Costly), pipeline.middlewares());

        op.run(&OpContext::new(), &input()).await.unwrap();
        let budget = pipeline.budget().unwrap();
        assert!((budget.used() - 4.0).abs() < f64::EPSILON);
    }
}
