//! Metering middleware.
//!
//! Reports one [`MeterRecord`] per call to a caller-supplied [`Recorder`]. The
//! result and error pass through untouched.

use std::sync::Arc;

use async_trait::async_trait;
use repokeeper_core::{OpError, OpInput, OpOutput};
use tokio::time::Instant;
use tower::Layer;

use super::cache::CACHE_HIT_METRIC;
use super::Middleware;
use crate::context::OpContext;
use crate::operator::{BoxedOperator, Operator};

/// Structured fields describing one finished call.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterRecord {
    pub op: String,
    pub version: String,
    pub duration_ms: u64,
    /// Display form of the error, `None` on success.
    pub error: Option<String>,
    /// Target as `owner/name@head`.
    pub repo: String,
    /// Value of the output's `cache_hit` metric, 0 when absent.
    pub cache_hit: f64,
}

/// Receives a [`MeterRecord`] after every metered call.
pub trait Recorder: Send + Sync {
    fn record(&self, record: &MeterRecord);
}

impl<F> Recorder for F
where
    F: Fn(&MeterRecord) + Send + Sync,
{
    fn record(&self, record: &MeterRecord) {
        self(record);
    }
}

// ---------------------------------------------------------------------------
// MeterLayer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MeterLayer {
    recorder: Arc<dyn Recorder>,
}

impl MeterLayer {
    #[must_use]
    pub fn new(recorder: Arc<dyn Recorder>) -> Self {
        Self { recorder }
    }
}

impl Layer<BoxedOperator> for MeterLayer {
    type Service = BoxedOperator;

    fn layer(&self, inner: BoxedOperator) -> BoxedOperator {
        Arc::new(MeterOperator {
            inner,
            recorder: Arc::clone(&self.recorder),
        })
    }
}

/// Meter every call through `recorder`.
pub fn with_meter(recorder: Arc<dyn Recorder>) -> Middleware {
    Arc::new(MeterLayer::new(recorder))
}

// ---------------------------------------------------------------------------
// MeterOperator
// ---------------------------------------------------------------------------

struct MeterOperator {
    inner: BoxedOperator,
    recorder: Arc<dyn Recorder>,
}

#[async_trait]
impl Operator for MeterOperator {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn version(&self) -> &str {
        self.inner.version()
    }

    async fn run(&self, ctx: &OpContext, input: &OpInput) -> Result<OpOutput, OpError> {
        let start = Instant::now();
        let result = self.inner.run(ctx, input).await;
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let (error, cache_hit) = match &result {
            Ok(output) => (None, output.metric(CACHE_HIT_METRIC).map_or(0.0, |m| m.value)),
            Err(err) => (Some(err.to_string()), 0.0),
        };

        self.recorder.record(&MeterRecord {
            op: self.inner.name().to_string(),
            version: self.inner.version().to_string(),
            duration_ms,
            error,
            repo: input.repo.to_string(),
            cache_hit,
        });

        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
