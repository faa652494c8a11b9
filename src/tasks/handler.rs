//! # Handler abstraction.
//!
//! A registered handler is one of two explicitly declared shapes:
//! - [`Handler`]: one awaited call producing a single value;
//! - [`StreamHandler`]: a lazy stream of chunks.
//!
//! [`TaskHandler`] is the tagged union the registry stores; the worker slot
//! dispatches on the variant, never on runtime inspection of the result.
//!
//! # Example
//! ```
//! use async_trait::async_trait;
//! use serde_json::Value;
//! use taskhive::{Handler, TaskContext, TaskError};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Handler for Echo {
//!     async fn call(&self, payload: Value, ctx: TaskContext) -> Result<Value, TaskError> {
//!         ctx.checkpoint()?;
//!         Ok(payload)
//!     }
//! }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::error::TaskError;
use crate::tasks::TaskContext;
use crate::tasks::handler_fn::{HandlerFn, StreamFn};

/// Boxed chunk stream produced by a [`StreamHandler`].
pub type ChunkStream = BoxStream<'static, Result<Value, TaskError>>;

/// Handler producing a single result.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Executes one attempt.
    ///
    /// Implementations should check `ctx` for cancellation and return
    /// `Err(TaskError::Canceled)` promptly when it fires.
    async fn call(&self, payload: Value, ctx: TaskContext) -> Result<Value, TaskError>;
}

/// Handler producing an ordered sequence of chunks.
pub trait StreamHandler: Send + Sync + 'static {
    /// Creates the chunk stream for one attempt.
    ///
    /// The stream is polled lazily by the worker slot; an `Err` item ends the attempt.
    fn stream(&self, payload: Value, ctx: TaskContext) -> ChunkStream;
}

/// Declared handler shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerKind {
    /// One result per attempt.
    Single,
    /// Incremental chunks.
    Streaming,
}

/// Registered handler: either single-shot or streaming.
#[derive(Clone)]
pub enum TaskHandler {
    /// Single-result handler.
    Single(Arc<dyn Handler>),
    /// Streaming handler.
    Streaming(Arc<dyn StreamHandler>),
}

impl TaskHandler {
    /// Wraps an async closure as a single-result handler.
    ///
    /// ```rust
    /// use taskhive::TaskHandler;
    ///
    /// let echo = TaskHandler::single(|payload, _ctx| async move { Ok(payload) });
    /// assert_eq!(echo.kind(), taskhive::HandlerKind::Single);
    /// ```
    pub fn single<F, Fut>(f: F) -> Self
    where
        F: Fn(Value, TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        TaskHandler::Single(Arc::new(HandlerFn::new(f)))
    }

    /// Wraps a closure returning a stream as a streaming handler.
    ///
    /// ```rust
    /// use futures::stream;
    /// use serde_json::json;
    /// use taskhive::{TaskError, TaskHandler};
    ///
    /// let abc = TaskHandler::streaming(|_payload, _ctx| {
    ///     stream::iter(["a", "b", "c"].map(|s| Ok::<_, TaskError>(json!(s))))
    /// });
    /// assert_eq!(abc.kind(), taskhive::HandlerKind::Streaming);
    /// ```
    pub fn streaming<F, S>(f: F) -> Self
    where
        F: Fn(Value, TaskContext) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<Value, TaskError>> + Send + 'static,
    {
        TaskHandler::Streaming(Arc::new(StreamFn::new(f)))
    }

    /// Returns the declared shape.
    pub fn kind(&self) -> HandlerKind {
        match self {
            TaskHandler::Single(_) => HandlerKind::Single,
            TaskHandler::Streaming(_) => HandlerKind::Streaming,
        }
    }
}

impl fmt::Debug for TaskHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskHandler").field(&self.kind()).finish()
    }
}
