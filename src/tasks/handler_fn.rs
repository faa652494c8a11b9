//! # Closure-backed handlers (`HandlerFn`, `StreamFn`)
//!
//! [`HandlerFn`] wraps `F: Fn(Value, TaskContext) -> Fut` and [`StreamFn`] wraps
//! `F: Fn(Value, TaskContext) -> S`. Each attempt calls the closure again and
//! gets a fresh future/stream owning its own state; nothing leaks between
//! retries. Shared state must be captured explicitly (e.g. `Arc<...>`).

use std::future::Future;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::error::TaskError;
use crate::tasks::TaskContext;
use crate::tasks::handler::{ChunkStream, Handler, StreamHandler};

/// Function-backed single-result handler.
pub struct HandlerFn<F> {
    f: F,
}

impl<F> HandlerFn<F> {
    /// Creates a new function-backed handler.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Value, TaskContext) -> Fut + Send + Sync + 'static, // Fn, not FnMut
    Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
{
    async fn call(&self, payload: Value, ctx: TaskContext) -> Result<Value, TaskError> {
        (self.f)(payload, ctx).await
    }
}

/// Function-backed streaming handler.
pub struct StreamFn<F> {
    f: F,
}

impl<F> StreamFn<F> {
    /// Creates a new function-backed streaming handler.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, S> StreamHandler for StreamFn<F>
where
    F: Fn(Value, TaskContext) -> S + Send + Sync + 'static,
    S: Stream<Item = Result<Value, TaskError>> + Send + 'static,
{
    fn stream(&self, payload: Value, ctx: TaskContext) -> ChunkStream {
        (self.f)(payload, ctx).boxed()
    }
}
