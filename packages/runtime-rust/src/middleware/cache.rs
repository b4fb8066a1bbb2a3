//! Result-caching middleware.
//!
//! A hit returns the stored output plus a synthetic `cache_hit = 1` metric and
//! never reaches the wrapped operator. Only successful outputs are stored.
//! Concurrent misses for one key all execute; the last write wins.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use repokeeper_core::{Metric, OpError, OpInput, OpOutput};
use tower::Layer;

use super::Middleware;
use crate::context::OpContext;
use crate::idempotency::make_cache_key;
use crate::operator::{BoxedOperator, Operator};

/// Metric appended to outputs served from cache.
pub const CACHE_HIT_METRIC: &str = "cache_hit";

/// Derives the cache key for a call.
pub type CacheKeyFn = Arc<dyn Fn(&dyn Operator, &OpInput) -> String + Send + Sync>;

/// Storage behind [`with_cache`].
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<OpOutput>;

    fn put(&self, key: String, output: OpOutput);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// MemoryCache
// ---------------------------------------------------------------------------

/// Unbounded concurrent map. Suitable for short-lived processes and tests.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, OpOutput>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Option<OpOutput> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn put(&self, key: String, output: OpOutput) {
        self.entries.insert(key, output);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

// ---------------------------------------------------------------------------
// BoundedCache
// ---------------------------------------------------------------------------

/// Capacity-bounded cache that evicts cold entries once full.
pub struct BoundedCache {
    entries: quick_cache::sync::Cache<String, OpOutput>,
}

impl BoundedCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: quick_cache::sync::Cache::new(capacity.max(1)),
        }
    }
}

impl CacheStore for BoundedCache {
    fn get(&self, key: &str) -> Option<OpOutput> {
        self.entries.get(key)
    }

    fn put(&self, key: String, output: OpOutput) {
        self.entries.insert(key, output);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

// ---------------------------------------------------------------------------
// CacheLayer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct CacheLayer {
    store: Arc<dyn CacheStore>,
    key_fn: CacheKeyFn,
}

impl CacheLayer {
    /// A missing `key_fn` falls back to [`make_cache_key`].
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>, key_fn: Option<CacheKeyFn>) -> Self {
        Self {
            store,
            key_fn: key_fn.unwrap_or_else(default_key_fn),
        }
    }
}

fn default_key_fn() -> CacheKeyFn {
    Arc::new(make_cache_key)
}

impl Layer<BoxedOperator> for CacheLayer {
    type Service = BoxedOperator;

    fn layer(&self, inner: BoxedOperator) -> BoxedOperator {
        Arc::new(CacheOperator {
            inner,
            store: Arc::clone(&self.store),
            key_fn: Arc::clone(&self.key_fn),
        })
    }
}

/// Serve repeated calls from `store`.
pub fn with_cache(store: Arc<dyn CacheStore>, key_fn: Option<CacheKeyFn>) -> Middleware {
    Arc::new(CacheLayer::new(store, key_fn))
}

// ---------------------------------------------------------------------------
// CacheOperator
// ---------------------------------------------------------------------------

struct CacheOperator {
    inner: BoxedOperator,
    store: Arc<dyn CacheStore>,
    key_fn: CacheKeyFn,
}

#[async_trait]
impl Operator for CacheOperator {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn version(&self) -> &str {
        self.inner.version()
    }

    async fn run(&self, ctx: &OpContext, input: &OpInput) -> Result<OpOutput, OpError> {
        let key = (self.key_fn)(self.inner.as_ref(), input);

        if let Some(mut cached) = self.store.get(&key) {
            tracing::debug!(operator = %self.inner.name(), key = %key, "cache hit");
            cached.push_metric(Metric::new(CACHE_HIT_METRIC, 1.0));
            return Ok(cached);
        }

        let output = self.inner.run(ctx, input).await?;
        self.store.put(key, output.clone());
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::super::chain;
    use super::super::test_support::{input, FlakyOp};
    use super::*;

    #[tokio::test]
    async fn second_identical_call_is_served_from_cache() {
        let store = Arc::new(MemoryCache::new());
        let (op, calls) = FlakyOp::new(0);
        let op = chain(Arc::new(op), &[with_cache(store.clone(), None)]);

        let first = op.run(&OpContext::new(), &input()).await.unwrap();
        let second = op.run(&OpContext::new(), &input()).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(first.metric(CACHE_HIT_METRIC).is_none());
        let hit = second.metric(CACHE_HIT_METRIC).unwrap();
        assert!((hit.value - 1.0).abs() < f64::EPSILON);
        assert_eq!(second.data, first.data);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn stored_output_does_not_accumulate_hit_metrics() {
        let store = Arc::new(MemoryCache::new());
        let (op, _) = FlakyOp::new(0);
        let op = chain(Arc::new(op), &[with_cache(store, None)]);

        for _ in 0..4 {
            op.run(&OpContext::new(), &input()).await.unwrap();
        }
        let out = op.run(&OpContext::new(), &input()).await.unwrap();
        assert_eq!(out.metrics.len(), 1);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let store = Arc::new(MemoryCache::new());
        let (op, calls) = FlakyOp::new(1);
        let op = chain(Arc::new(op), &[with_cache(store.clone(), None)]);

        assert!(op.run(&OpContext::new(), &input()).await.is_err());
        assert!(store.is_empty());

        op.run(&OpContext::new(), &input()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn different_params_miss() {
        let store = Arc::new(MemoryCache::new());
        let (op, calls) = FlakyOp::new(0);
        let op = chain(Arc::new(op), &[with_cache(store, None)]);

        op.run(&OpContext::new(), &input()).await.unwrap();
        op.run(&OpContext::new(), &input().with_param("x", 2))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn custom_key_fn_groups_calls() {
        let store = Arc::new(MemoryCache::new());
        let (op, calls) = FlakyOp::new(0);
        let by_repo: CacheKeyFn =
            Arc::new(|op: &dyn Operator, input: &OpInput| format!("{}:{}", op.name(), input.repo));
        let op = chain(Arc::new(op), &[with_cache(store, Some(by_repo))]);

        op.run(&OpContext::new(), &input()).await.unwrap();
        op.run(&OpContext::new(), &input().with_param("x", 99))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn bounded_cache_respects_capacity() {
        let cache = BoundedCache::new(8);
        for i in 0..256 {
            cache.put(format!("k{i}"), OpOutput::with_data(i));
        }
        assert!(cache.len() < 64);
        assert!(!cache.is_empty());
    }

    #[test]
    fn bounded_cache_round_trip() {
        let cache = BoundedCache::new(4);
        cache.put("k".to_string(), OpOutput::with_data("v"));
        assert_eq!(cache.get("k").unwrap().data, serde_json::json!("v"));
        assert!(cache.get("missing").is_none());
    }
}
