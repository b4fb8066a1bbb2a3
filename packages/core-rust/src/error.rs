/// Errors produced while dispatching or running an operator.
///
/// `BudgetExceeded`, `Canceled` and `Timeout` are the sentinels the runtime
/// itself raises. Everything an operator reports about its own work travels as
/// `Operator` and is opaque to the runtime.
#[derive(Debug, thiserror::Error)]
pub enum OpError {
    #[error("unknown operator: {name}")]
    UnknownOperator { name: String },
    #[error("budget exceeded")]
    BudgetExceeded,
    #[error("operation canceled")]
    Canceled,
    #[error("operation deadline exceeded")]
    Timeout,
    #[error("invalid operator input: {0}")]
    Decode(String),
    #[error("missing client: {client}")]
    MissingClient { client: &'static str },
    #[error(transparent)]
    Operator(#[from] anyhow::Error),
}

impl OpError {
    /// Default retry predicate: everything except budget exhaustion and
    /// context termination is worth another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::BudgetExceeded | Self::Canceled | Self::Timeout)
    }

    /// Whether the error reports the end of the call's context.
    #[must_use]
    pub fn is_context_error(&self) -> bool {
        matches!(self, Self::Canceled | Self::Timeout)
    }
}

impl From<serde_json::Error> for OpError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
