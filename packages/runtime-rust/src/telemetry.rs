//! Logging setup and the default metering sink.

use std::sync::Once;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::middleware::{MeterRecord, Recorder};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    #[default]
    Pretty,
}

/// Install a global `tracing` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Only the first call has an effect.
pub fn init_tracing(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let registry = tracing_subscriber::registry().with(env_filter);
        // A subscriber installed by the host application takes precedence.
        let _ = match format {
            LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
            LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        };
    });
}

/// [`Recorder`] that logs every record and feeds the `metrics` facade.
///
/// Emits `operator_calls_total` (counter) and `operator_duration_ms`
/// (histogram), both labelled with `op` and `outcome`, plus
/// `operator_cache_hits_total` for cached results. Nothing is exported unless
/// the host installs a `metrics` recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRecorder;

impl Recorder for TracingRecorder {
    fn record(&self, record: &MeterRecord) {
        let outcome = if record.error.is_some() { "error" } else { "ok" };

        tracing::info!(
            op = %record.op,
            ver = %record.version,
            repo = %record.repo,
            dur_ms = record.duration_ms,
            cache_hit = record.cache_hit,
            err = record.error.as_deref().unwrap_or(""),
            outcome = outcome,
            "operator call complete"
        );

        metrics::counter!(
            "operator_calls_total",
            "op" => record.op.clone(),
            "outcome" => outcome
        )
        .increment(1);

        #[allow(clippy::cast_precision_loss)]
        let duration = record.duration_ms as f64;
        metrics::histogram!(
            "operator_duration_ms",
            "op" => record.op.clone(),
            "outcome" => outcome
        )
        .record(duration);

        if record.cache_hit > 0.0 {
            metrics::counter!("operator_cache_hits_total", "op" => record.op.clone()).increment(1);
        }
    }
}
