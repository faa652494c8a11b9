//! # Task abstractions, registration and envelopes.
//!
//! This module provides the task-related types:
//! - [`TaskHandler`] - tagged handler: [`Handler`] (single result) or [`StreamHandler`] (chunks)
//! - [`HandlerFn`] / [`StreamFn`] - closure-backed handler implementations
//! - [`TaskMetadata`] - static descriptor attached at registration
//! - [`TaskRegistry`] - immutable name → (handler, metadata) table
//! - [`TaskContext`] - per-attempt context handed to handlers (cancellation, deadline)
//! - [`ScheduledTask`] - one schedulable attempt with ordering keys and retry state
//! - [`TaskId`], [`Priority`], [`TaskCategory`] - identity and classification

mod context;
mod envelope;
mod handler;
mod handler_fn;
mod id;
mod metadata;
mod registry;

pub use context::TaskContext;
pub use envelope::{RETRY_SEQUENCE_STRIDE, ScheduledTask};
pub use handler::{ChunkStream, Handler, HandlerKind, StreamHandler, TaskHandler};
pub use handler_fn::{HandlerFn, StreamFn};
pub use id::TaskId;
pub use metadata::{Priority, TaskCategory, TaskMetadata};
pub use registry::{RegisteredTask, RegistryBuilder, TaskRegistry};
