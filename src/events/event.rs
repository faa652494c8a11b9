//! # Task lifecycle events.
//!
//! [`EventKind`] enumerates the lifecycle transitions broadcast by the
//! orchestrator and worker slots. [`Event`] carries the task id, a JSON
//! payload whose fields depend on the kind, and a UTC timestamp.
//!
//! ## Wire shape
//! ```text
//! { "task_id": "…", "event_type": "retried", "payload": { … }, "timestamp": "…" }
//! ```
//!
//! ## Ordering guarantees
//! Each event has a process-wide sequence number (`seq`) that increases
//! monotonically. Use `seq` to restore order when delivery interleaves.
//!
//! ## Example
//! ```rust
//! use serde_json::json;
//! use taskhive::{Event, EventKind, TaskId};
//!
//! let id = TaskId::new();
//! let ev = Event::chunk(id, 0, json!("a"));
//!
//! assert_eq!(ev.kind, EventKind::Chunk);
//! assert_eq!(ev.payload["chunk"], json!("a"));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::TaskError;
use crate::tasks::{Priority, TaskId};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Task accepted by `submit`.
    ///
    /// Payload: `name`, `priority`, `labels`.
    Submitted,

    /// An attempt is starting.
    ///
    /// Payload: `name`, `attempt`.
    Started,

    /// A streaming handler produced a chunk.
    ///
    /// Payload: `index` (0-based), `chunk`.
    Chunk,

    /// The attempt failed and a successor was scheduled.
    ///
    /// Payload: `attempt` (the failed one), `delay_ms`, `error`.
    Retried,

    /// Terminal success.
    ///
    /// Payload: `attempts`, `output`.
    Completed,

    /// Terminal failure (retries exhausted, fatal error or deadline).
    ///
    /// Payload: `attempts`, `error`, `reason` (stable label).
    Failed,

    /// Terminal cancellation.
    ///
    /// Payload: `attempts`, `reason`.
    Cancelled,
}

impl EventKind {
    /// Stable lowercase name, identical to the serialized `event_type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Submitted => "submitted",
            EventKind::Started => "started",
            EventKind::Chunk => "chunk",
            EventKind::Retried => "retried",
            EventKind::Completed => "completed",
            EventKind::Failed => "failed",
            EventKind::Cancelled => "cancelled",
        }
    }

    /// Returns `true` for `completed`, `failed` and `cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::Completed | EventKind::Failed | EventKind::Cancelled
        )
    }
}

/// Lifecycle event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Process-wide, monotonically increasing sequence number.
    #[serde(skip)]
    pub seq: u64,
    /// Task the event belongs to.
    pub task_id: TaskId,
    /// Event classification.
    #[serde(rename = "event_type")]
    pub kind: EventKind,
    /// Kind-specific details.
    pub payload: Value,
    /// Wall-clock timestamp.
    #[serde(rename = "timestamp")]
    pub at: DateTime<Utc>,
}

impl Event {
    /// Creates an event with the current timestamp and the next sequence number.
    pub fn new(kind: EventKind, task_id: TaskId, payload: Value) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            task_id,
            kind,
            payload,
            at: Utc::now(),
        }
    }

    /// Task accepted.
    pub fn submitted(task_id: TaskId, name: &str, priority: Priority, labels: &[String]) -> Self {
        Event::new(
            EventKind::Submitted,
            task_id,
            json!({ "name": name, "priority": priority, "labels": labels }),
        )
    }

    /// Attempt starting.
    pub fn started(task_id: TaskId, name: &str, attempt: u32) -> Self {
        Event::new(
            EventKind::Started,
            task_id,
            json!({ "name": name, "attempt": attempt }),
        )
    }

    /// Streaming chunk number `index`.
    pub fn chunk(task_id: TaskId, index: usize, chunk: Value) -> Self {
        Event::new(
            EventKind::Chunk,
            task_id,
            json!({ "index": index, "chunk": chunk }),
        )
    }

    /// Attempt `attempt` failed; the next one is due after `delay`.
    pub fn retried(task_id: TaskId, attempt: u32, delay: Duration, error: &TaskError) -> Self {
        let delay_ms = delay.as_millis().min(u128::from(u64::MAX)) as u64;
        Event::new(
            EventKind::Retried,
            task_id,
            json!({ "attempt": attempt, "delay_ms": delay_ms, "error": error.as_message() }),
        )
    }

    /// Terminal success.
    pub fn completed(task_id: TaskId, attempts: u32, output: &Value) -> Self {
        Event::new(
            EventKind::Completed,
            task_id,
            json!({ "attempts": attempts, "output": output }),
        )
    }

    /// Terminal failure.
    pub fn failed(task_id: TaskId, attempts: u32, error: &TaskError) -> Self {
        Event::new(
            EventKind::Failed,
            task_id,
            json!({
                "attempts": attempts,
                "error": error.as_message(),
                "reason": error.as_label(),
            }),
        )
    }

    /// Terminal cancellation.
    pub fn cancelled(task_id: TaskId, attempts: u32, reason: &str) -> Self {
        Event::new(
            EventKind::Cancelled,
            task_id,
            json!({ "attempts": attempts, "reason": reason }),
        )
    }

    /// Serializes the event to its JSON wire shape.
    pub fn to_json(&self) -> Value {
        json!({
            "task_id": self.task_id,
            "event_type": self.kind,
            "payload": self.payload,
            "timestamp": self.at,
        })
    }
}
