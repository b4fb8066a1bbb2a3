//! Dispatch facade: lookup, middleware, call identity and cancellation.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use repokeeper_core::{Metric, OpError, OpInput, OpOutput};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::context::OpContext;
use crate::idempotency::make_id_key;
use crate::middleware::{build_pipeline, chain, CostFn, Middleware, Pipeline, Recorder};
use crate::operator::BoxedOperator;
use crate::registry::Registry;

// ---------------------------------------------------------------------------
// StatusEvent
// ---------------------------------------------------------------------------

/// Progress of a call started with [`Manager::monitor`].
///
/// Every monitored call yields `Running` followed by exactly one terminal event.
#[derive(Debug)]
pub enum StatusEvent {
    Running,
    Done { metrics: Vec<Metric> },
    Failed { error: OpError },
}

impl StatusEvent {
    #[must_use]
    pub fn status(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Done { .. } => "done",
            Self::Failed { .. } => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

// ---------------------------------------------------------------------------
// Job tracking
// ---------------------------------------------------------------------------

struct Job {
    call_id: Uuid,
    token: CancellationToken,
}

type Jobs = Arc<Mutex<HashMap<String, Job>>>;

/// Releases a tracked job when the dispatch future completes or is dropped.
struct JobGuard {
    jobs: Jobs,
    key: String,
    call_id: Uuid,
    token: CancellationToken,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.token.cancel();
        let mut jobs = self.jobs.lock();
        // A later call under the same key owns the slot now; leave it alone.
        if jobs.get(&self.key).is_some_and(|job| job.call_id == self.call_id) {
            jobs.remove(&self.key);
        }
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Resolves operators from a [`Registry`], wraps them in the configured
/// middleware and runs them, tracking a cancel handle per idempotency key.
///
/// Cheap to clone; clones share the registry, middleware and job table.
#[derive(Clone)]
pub struct Manager {
    registry: Arc<Registry>,
    middlewares: Arc<[Middleware]>,
    jobs: Jobs,
    monitor_capacity: usize,
}

impl Manager {
    /// Manager without middleware.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            middlewares: Arc::from(Vec::new()),
            jobs: Arc::new(Mutex::new(HashMap::new())),
            monitor_capacity: 2,
        }
    }

    /// Manager running the standard pipeline described by `config`.
    ///
    /// The returned [`Pipeline`] exposes the budget and cache it created.
    #[must_use]
    pub fn from_config(
        registry: Arc<Registry>,
        config: &RuntimeConfig,
        recorder: Arc<dyn Recorder>,
        cost_fn: Option<CostFn>,
    ) -> (Self, Pipeline) {
        let pipeline = build_pipeline(config, recorder, cost_fn);
        let manager = Self::new(registry)
            .with_middlewares(pipeline.middlewares().iter().cloned())
            .with_monitor_capacity(config.monitor_channel_capacity);
        (manager, pipeline)
    }

    /// Append middleware. Earlier middleware wraps later middleware.
    #[must_use]
    pub fn with_middlewares(mut self, middlewares: impl IntoIterator<Item = Middleware>) -> Self {
        let mut all: Vec<Middleware> = self.middlewares.iter().cloned().collect();
        all.extend(middlewares);
        self.middlewares = Arc::from(all);
        self
    }

    #[must_use]
    pub fn with_middleware(self, middleware: Middleware) -> Self {
        self.with_middlewares([middleware])
    }

    /// Capacity of monitor channels; never below the two events they carry.
    #[must_use]
    pub fn with_monitor_capacity(mut self, capacity: usize) -> Self {
        self.monitor_capacity = capacity.max(2);
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn resolve(&self, name: &str) -> Result<BoxedOperator, OpError> {
        let op = self
            .registry
            .get(name)
            .ok_or_else(|| OpError::UnknownOperator {
                name: name.to_string(),
            })?;
        Ok(chain(op, &self.middlewares))
    }

    /// The idempotency key `dispatch` would use for this call.
    ///
    /// # Errors
    ///
    /// Returns `OpError::UnknownOperator` if `name` is not registered.
    pub fn key_for(&self, name: &str, input: &OpInput) -> Result<String, OpError> {
        let op = self.resolve(name)?;
        Ok(make_id_key(op.as_ref(), input))
    }

    /// Run the operator registered as `name` on the caller's task.
    ///
    /// An unknown name fails immediately without touching middleware or job
    /// tracking. Otherwise the call is tracked under its idempotency key
    /// (derived when `input` carries none) until it returns, and can be
    /// cancelled through [`cancel`](Self::cancel) meanwhile.
    ///
    /// # Errors
    ///
    /// Returns `OpError::UnknownOperator` for unregistered names, otherwise
    /// whatever the middleware chain or operator reports.
    pub async fn dispatch(
        &self,
        ctx: &OpContext,
        name: &str,
        mut input: OpInput,
    ) -> Result<OpOutput, OpError> {
        let op = self.resolve(name)?;

        if input.idempotency_key.is_empty() {
            input.idempotency_key = make_id_key(op.as_ref(), &input);
        }
        let key = input.idempotency_key.clone();

        let call_ctx = ctx.child();
        let _job = self.track(&key, call_ctx.token().clone());

        let span = tracing::info_span!("dispatch", op = %name, key = %key);
        async {
            let result = op.run(&call_ctx, &input).await;
            if let Err(err) = &result {
                tracing::debug!(error = %err, "dispatch failed");
            }
            result
        }
        .instrument(span)
        .await
    }

    fn track(&self, key: &str, token: CancellationToken) -> JobGuard {
        let call_id = Uuid::new_v4();
        self.jobs.lock().insert(
            key.to_string(),
            Job {
                call_id,
                token: token.clone(),
            },
        );
        JobGuard {
            jobs: Arc::clone(&self.jobs),
            key: key.to_string(),
            call_id,
            token,
        }
    }

    /// Run `dispatch` on a spawned task and report progress on a channel.
    ///
    /// The receiver yields `Running`, then one `Done` or `Failed`, then closes.
    /// Must be called within a tokio runtime.
    pub fn monitor(
        &self,
        ctx: OpContext,
        name: impl Into<String>,
        input: OpInput,
    ) -> mpsc::Receiver<StatusEvent> {
        let (tx, rx) = mpsc::channel(self.monitor_capacity);
        let manager = self.clone();
        let name = name.into();

        tokio::spawn(async move {
            // Send errors only mean the receiver is gone; the call still runs to completion.
            let _ = tx.send(StatusEvent::Running).await;
            let terminal = match manager.dispatch(&ctx, &name, input).await {
                Ok(output) => StatusEvent::Done {
                    metrics: output.metrics,
                },
                Err(error) => StatusEvent::Failed { error },
            };
            let _ = tx.send(terminal).await;
        });

        rx
    }

    /// Cancel the call currently tracked under `key`.
    ///
    /// The tracking entry is removed right away, without waiting for the
    /// operator to notice. Returns `false` if nothing was tracked under `key`.
    pub fn cancel(&self, key: &str) -> bool {
        let job = self.jobs.lock().remove(key);
        match job {
            Some(job) => {
                job.token.cancel();
                tracing::info!(key = %key, "dispatch cancelled");
                true
            }
            None => false,
        }
    }

    /// Keys of calls currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.jobs.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
