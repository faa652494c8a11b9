//! # taskhive
//!
//! **Taskhive** is an in-process task orchestrator for async Rust services.
//!
//! Handlers are registered by name. Callers submit work by name with a JSON
//! payload; the orchestrator queues it by priority, executes it on a worker
//! pool chosen by the handler's category, retries transient failures with
//! exponential backoff, streams partial results, and broadcasts every
//! lifecycle transition.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   submit(name, payload, opts)        cancel / status / wait / stream / list
//!              │                                       │
//!              ▼                                       ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Orchestrator                                                     │
//! │  - TaskRegistry   (name → handler + metadata, frozen)             │
//! │  - Admission      (CPU / in-flight throttling, defers Normal/Low) │
//! │  - RecordStore    (task_id → TaskRecord, change notification)     │
//! │  - routes         (TaskCategory → pool)                           │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!  ┌────────────┐     ┌────────────┐     ┌────────────┐
//!  │ queue[llm] │     │ queue[tool]│     │ queue[bg]  │  PriorityTaskQueue
//!  └─────┬──────┘     └─────┬──────┘     └─────┬──────┘  (ready + delayed heaps)
//!        ▼                  ▼                  ▼
//!  ┌────────────┐     ┌────────────┐     ┌────────────┐
//!  │ WorkerPool │     │ WorkerPool │     │ WorkerPool │  slots: pop_ready → execute
//!  └─────┬──────┘     └─────┬──────┘     └─────┬──────┘
//!        │ submitted / started / chunk / retried / completed / failed / cancelled
//!        ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Broadcaster (in-process Bus, or NATS mirror with feature `nats`) │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                   ┌───────────────┴───────────────┐
//!                   ▼                               ▼
//!           subscriber listener           Orchestrator::subscribe()
//!                   ▼
//!             SubscriberSet ──► worker per Subscribe impl (bounded queue)
//! ```
//!
//! ### Attempt lifecycle
//! ```text
//! PENDING ─► RUNNING ─► (STREAMING) ─┬─► COMPLETED
//!                                    ├─► Fail, budget left, no chunks yet
//!                                    │      └─► RETRY_SCHEDULED ─► (backoff) ─► RUNNING …
//!                                    ├─► Fatal / budget spent / deadline ─► FAILED
//!                                    └─► cancelled ─► CANCELLED
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                          |
//! |-------------------|---------------------------------------------------------------|---------------------------------------------|
//! | **Tasks**         | Register single-result and streaming handlers by name.        | [`TaskHandler`], [`TaskRegistry`], [`TaskMetadata`] |
//! | **Queueing**      | Priority order, FIFO ties, delayed retries, throttling.       | [`PriorityTaskQueue`], [`ThrottleConfig`]   |
//! | **Policies**      | Retry budget and exponential backoff with jitter.             | [`RetryPolicy`], [`BackoffPolicy`]          |
//! | **Orchestration** | Submit, cancel, inspect, scale and stop.                      | [`Orchestrator`], [`SubmitOptions`]         |
//! | **Events**        | Lifecycle broadcast and subscriber fan-out.                   | [`Event`], [`Broadcaster`], [`Subscribe`]   |
//! | **Errors**        | Administrative and execution errors.                          | [`OrchestratorError`], [`TaskError`]        |
//! | **Configuration** | Pool layout, retry defaults, retention, throttling.           | [`OrchestratorConfig`]                      |
//!
//! ## Optional features
//! - `logging` (default): exports the built-in [`LogWriter`] subscriber.
//! - `nats`: exports `ExternalBroadcaster`, mirroring events to NATS.
//!
//! ## Example
//! ```rust
//! use serde_json::json;
//! use taskhive::{Orchestrator, SubmitOptions, TaskCategory, TaskHandler, TaskMetadata, TaskRegistry, TaskStatus};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = TaskRegistry::builder()
//!         .register(
//!             "echo",
//!             TaskHandler::single(|payload, _ctx| async move { Ok(payload) }),
//!             TaskMetadata::new(TaskCategory::Tool),
//!         )?
//!         .build();
//!
//!     let orch = Orchestrator::builder(registry).build();
//!     orch.start();
//!
//!     let id = orch.submit("echo", json!({"hello": "world"}), SubmitOptions::default())?;
//!     let record = orch.wait(id).await?;
//!     assert_eq!(record.status, TaskStatus::Completed);
//!     assert_eq!(record.output, Some(json!({"hello": "world"})));
//!
//!     orch.stop(true).await?;
//!     Ok(())
//! }
//! ```
mod core;
mod error;
mod events;
mod policies;
mod queue;
mod subscribers;
mod tasks;

// ---- Public re-exports ----

pub use core::{
    Orchestrator, OrchestratorBuilder, OrchestratorConfig, PoolSpec, PoolStatus, SubmitOptions,
    TaskFilter, TaskRecord, TaskStatus,
};
pub use error::{OrchestratorError, TaskError};
pub use events::{Broadcaster, Bus, Event, EventKind, EventSubscription, InProcessBroadcaster};
pub use policies::{BackoffPolicy, JitterPolicy, MAX_RETRY_DELAY, RetryPolicy};
pub use queue::{
    Admission, LoadProbe, LoadSample, PriorityTaskQueue, QueueError, SystemLoadProbe,
    ThrottleConfig,
};
pub use subscribers::{Subscribe, SubscriberSet};
pub use tasks::{
    ChunkStream, Handler, HandlerFn, HandlerKind, Priority, RETRY_SEQUENCE_STRIDE,
    RegisteredTask, RegistryBuilder, ScheduledTask, StreamFn, StreamHandler, TaskCategory,
    TaskContext, TaskHandler, TaskId, TaskMetadata, TaskRegistry,
};

// Optional: mirror events to NATS.
// Enable with: `--features nats`
#[cfg(feature = "nats")]
pub use events::ExternalBroadcaster;

// Optional: built-in tracing subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
