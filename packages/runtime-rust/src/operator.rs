//! The executable-unit abstraction and the typed-to-erased bridge.

use std::sync::Arc;

use async_trait::async_trait;
use repokeeper_core::{OpError, OpInput, OpOutput};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::context::OpContext;

/// A named, versioned unit of work.
///
/// `run` must return promptly once `ctx` ends and must not leave spawned work
/// running past that point.
#[async_trait]
pub trait Operator: Send + Sync {
    /// Registry name. Last registration under a name wins.
    fn name(&self) -> &str;

    /// Informational version; part of derived idempotency keys.
    fn version(&self) -> &str;

    async fn run(&self, ctx: &OpContext, input: &OpInput) -> Result<OpOutput, OpError>;
}

/// Shared, type-erased operator as stored in the registry and wrapped by middleware.
pub type BoxedOperator = Arc<dyn Operator>;

/// An operator written against its own input and output types.
///
/// Exposed to the runtime through [`adapt`] or [`adapt_json`].
#[async_trait]
pub trait TypedOperator: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    fn name(&self) -> &str;

    fn version(&self) -> &str;

    async fn run_typed(&self, ctx: &OpContext, input: Self::Input)
        -> Result<Self::Output, OpError>;
}

// ---------------------------------------------------------------------------
// adapt
// ---------------------------------------------------------------------------

struct Adapted<T, D, E> {
    typed: T,
    decode: D,
    encode: E,
}

#[async_trait]
impl<T, D, E> Operator for Adapted<T, D, E>
where
    T: TypedOperator,
    D: Fn(&OpInput) -> Result<T::Input, OpError> + Send + Sync,
    E: Fn(T::Output) -> OpOutput + Send + Sync,
{
    fn name(&self) -> &str {
        self.typed.name()
    }

    fn version(&self) -> &str {
        self.typed.version()
    }

    async fn run(&self, ctx: &OpContext, input: &OpInput) -> Result<OpOutput, OpError> {
        let typed_input = (self.decode)(input)?;
        let output = self.typed.run_typed(ctx, typed_input).await?;
        Ok((self.encode)(output))
    }
}

/// Expose a [`TypedOperator`] as an [`Operator`].
///
/// `decode` runs first; if it fails its error is returned and `run_typed` is
/// never called. On success the typed output is mapped through `encode`.
/// Decoding is the place to validate parameters and pull the needed clients out
/// of the [`ClientBundle`](repokeeper_core::ClientBundle).
pub fn adapt<T, D, E>(typed: T, decode: D, encode: E) -> BoxedOperator
where
    T: TypedOperator,
    D: Fn(&OpInput) -> Result<T::Input, OpError> + Send + Sync + 'static,
    E: Fn(T::Output) -> OpOutput + Send + Sync + 'static,
{
    Arc::new(Adapted {
        typed,
        decode,
        encode,
    })
}

// ---------------------------------------------------------------------------
// adapt_json
// ---------------------------------------------------------------------------

struct JsonAdapted<T>(T);

#[async_trait]
impl<T> Operator for JsonAdapted<T>
where
    T: TypedOperator,
    T::Input: DeserializeOwned,
    T::Output: Serialize,
{
    fn name(&self) -> &str {
        self.0.name()
    }

    fn version(&self) -> &str {
        self.0.version()
    }

    async fn run(&self, ctx: &OpContext, input: &OpInput) -> Result<OpOutput, OpError> {
        let params: Map<String, Value> = input
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let typed_input: T::Input = serde_json::from_value(Value::Object(params))?;
        let output = self.0.run_typed(ctx, typed_input).await?;
        let data = serde_json::to_value(output)
            .map_err(|e| OpError::Operator(anyhow::anyhow!("encoding output: {e}")))?;
        Ok(OpOutput::with_data(data))
    }
}

/// Like [`adapt`], decoding `params` with serde and encoding the output into
/// [`OpOutput::data`].
pub fn adapt_json<T>(typed: T) -> BoxedOperator
where
    T: TypedOperator,
    T::Input: DeserializeOwned,
    T::Output: Serialize,
{
    Arc::new(JsonAdapted(typed))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
