use std::time::Duration;

use serde::Deserialize;

/// Prefix of the environment variables read by [`RuntimeConfig::from_env`].
pub const ENV_PREFIX: &str = "REPOKEEPER_";

/// Runtime-level configuration for the operator pipeline.
///
/// Controls per-call timeouts, retry policy, the shared cost budget, result
/// caching and the monitor channel size. Deserializable so host applications
/// can embed it in their own config files; omitted fields take the defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Per-call timeout in milliseconds. 0 disables the timeout layer.
    pub operation_timeout_ms: u64,
    /// Total attempts per call, including the first.
    pub retry_max_attempts: u32,
    /// Base backoff delay in milliseconds.
    pub retry_base_delay_ms: u64,
    /// Process-wide cost ceiling. `None` disables budgeting.
    pub budget_max: Option<f64>,
    /// Maximum cached results. `None` disables caching.
    pub cache_capacity: Option<usize>,
    /// Buffer size of the channel returned by `Manager::monitor`.
    pub monitor_channel_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 30_000,
            retry_max_attempts: 3,
            retry_base_delay_ms: 200,
            budget_max: None,
            cache_capacity: None,
            monitor_channel_capacity: 2,
        }
    }
}

/// Errors from reading configuration out of the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: String, value: String },
}

impl RuntimeConfig {
    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    #[must_use]
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Defaults overridden by `REPOKEEPER_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable is set but unparsable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable is set but unparsable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let read = |suffix: &str| {
            let var = format!("{ENV_PREFIX}{suffix}");
            lookup(&var).map(|value| (var, value.trim().to_string()))
        };

        if let Some((var, value)) = read("OPERATION_TIMEOUT_MS") {
            config.operation_timeout_ms = parse(&var, &value)?;
        }
        if let Some((var, value)) = read("RETRY_MAX_ATTEMPTS") {
            config.retry_max_attempts = parse(&var, &value)?;
        }
        if let Some((var, value)) = read("RETRY_BASE_DELAY_MS") {
            config.retry_base_delay_ms = parse(&var, &value)?;
        }
        if let Some((var, value)) = read("BUDGET_MAX") {
            config.budget_max = Some(parse(&var, &value)?);
        }
        if let Some((var, value)) = read("CACHE_CAPACITY") {
            config.cache_capacity = Some(parse(&var, &value)?);
        }
        if let Some((var, value)) = read("MONITOR_CHANNEL_CAPACITY") {
            config.monitor_channel_capacity = parse(&var, &value)?;
        }
        Ok(config)
    }
}

fn parse<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        var: var.to_string(),
        value: value.to_string(),
    })
}
