//! `repokeeper` runtime: operator registry, composable middleware and the
//! dispatch manager that ties them together.

pub mod config;
pub mod context;
pub mod idempotency;
pub mod manager;
pub mod middleware;
pub mod operator;
pub mod registry;
pub mod telemetry;

pub use config::{ConfigError, RuntimeConfig};
pub use context::OpContext;
pub use idempotency::{make_cache_key, make_id_key};
pub use manager::{Manager, StatusEvent};
pub use middleware::{chain, middleware_fn, Middleware};
pub use operator::{adapt, adapt_json, BoxedOperator, Operator, TypedOperator};
pub use registry::Registry;
pub use repokeeper_core::{
    ClientBundle, Descriptor, Insight, Metric, OpError, OpInput, OpOutput, RepoRef,
};
pub use telemetry::{init_tracing, LogFormat, TracingRecorder};
