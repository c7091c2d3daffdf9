//! Handler traits.
//!
//! - [`Handler`]: object-safe, works on the raw job (`Arc<dyn Handler>`)
//! - [`TypedMethod`]: typed input/output, wrapped by [`TypedHandler`]
//! - [`handler_fn`]: closure adapter

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::domain::HandlerError;
use crate::ports::JobContext;

/// A method of a service.
///
/// The `Ok` value becomes the job's result, the `Err` its failure. The payload
/// still carries the routing field `_`.
///
/// ```ignore
/// struct Echo;
///
/// #[async_trait]
/// impl Handler for Echo {
///     async fn handle(&self, ctx: JobContext) -> Result<Value, HandlerError> {
///         Ok(Value::Object(ctx.data().clone()))
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: JobContext) -> Result<Value, HandlerError>;
}

/// Closure-backed [`Handler`], built with [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as a [`Handler`].
///
/// ```ignore
/// let echo = handler_fn(|ctx: JobContext| async move {
///     Ok(Value::Object(ctx.data().clone()))
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn handle(&self, ctx: JobContext) -> Result<Value, HandlerError> {
        (self.f)(ctx).await
    }
}

/// A method with a typed payload.
///
/// The payload is decoded into `T` with serde (unknown fields, including the
/// routing field, are ignored unless `T` denies them) and the output is encoded
/// back to JSON.
#[async_trait]
pub trait TypedMethod<T>: Send + Sync
where
    T: DeserializeOwned + Send + 'static,
{
    type Output: Serialize + Send;

    async fn call(&self, input: T, ctx: &JobContext) -> Result<Self::Output, HandlerError>;
}

/// Adapts a [`TypedMethod`] into a [`Handler`].
pub struct TypedHandler<T, H> {
    method: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T, H> TypedHandler<T, H>
where
    T: DeserializeOwned + Send + 'static,
    H: TypedMethod<T>,
{
    pub fn new(method: H) -> Self {
        Self {
            method,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T, H> Handler for TypedHandler<T, H>
where
    T: DeserializeOwned + Send + 'static,
    H: TypedMethod<T>,
{
    async fn handle(&self, ctx: JobContext) -> Result<Value, HandlerError> {
        let input: T = serde_json::from_value(Value::Object(ctx.data().clone()))
            .map_err(|e| HandlerError::new(format!("json decode: {e}")))?;
        let output = self.method.call(input, &ctx).await?;
        Ok(serde_json::to_value(output)?)
    }
}
