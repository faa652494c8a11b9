//! # Externally visible task state.
//!
//! A [`TaskRecord`] follows one `task_id` across all of its attempts:
//!
//! ```text
//! PENDING ──► RUNNING ──┬──► COMPLETED
//!    │          │  ▲    ├──► FAILED
//!    │          ▼  │    └──► CANCELLED
//!    │       STREAMING     (from any non-terminal state)
//!    │          │
//!    │          └──► RETRY_SCHEDULED ──► RUNNING …
//!    └──────────────────────────────────► CANCELLED
//! ```
//!
//! Terminal states are sticky: every transition method returns `false` and
//! leaves the record untouched once it is terminal, so exactly one terminal
//! event is published per task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::error::TaskError;
use crate::tasks::{Priority, TaskId};

/// Lifecycle status of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Queued, no attempt started yet.
    Pending,
    /// An attempt is executing.
    Running,
    /// An attempt failed; the successor waits for its backoff.
    RetryScheduled,
    /// A streaming attempt has produced at least one chunk.
    Streaming,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled by the caller or by shutdown.
    Cancelled,
}

impl TaskStatus {
    /// Returns `true` for `Completed`, `Failed` and `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Returns `true` while the task waits in a queue.
    pub fn is_queued(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::RetryScheduled)
    }
}

/// Snapshot of a task's state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Task id.
    pub task_id: TaskId,
    /// Registered handler name.
    pub name: String,
    /// Current status.
    pub status: TaskStatus,
    /// Effective priority.
    pub priority: Priority,
    /// Labels given at submission.
    pub labels: Vec<String>,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Start of the most recent attempt.
    pub started_at: Option<DateTime<Utc>>,
    /// Time the record became terminal.
    pub ended_at: Option<DateTime<Utc>>,
    /// Attempts started so far.
    pub attempts: u32,
    /// Final output (set on `Completed`).
    pub output: Option<Value>,
    /// Chunks of the current streaming attempt, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunks: Vec<Value>,
    /// Last error message.
    pub error: Option<String>,
    #[serde(skip)]
    pub(crate) settled_at: Option<Instant>,
}

impl TaskRecord {
    /// New `Pending` record.
    pub fn pending(task_id: TaskId, name: &str, priority: Priority, labels: Vec<String>) -> Self {
        Self {
            task_id,
            name: name.to_string(),
            status: TaskStatus::Pending,
            priority,
            labels,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            attempts: 0,
            output: None,
            chunks: Vec::new(),
            error: None,
            settled_at: None,
        }
    }

    /// Returns `true` once the status is terminal.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Starts attempt `attempt`; chunks of a previous attempt are discarded.
    pub(crate) fn start_attempt(&mut self, attempt: u32) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = TaskStatus::Running;
        self.attempts = attempt;
        self.started_at = Some(Utc::now());
        self.chunks.clear();
        true
    }

    /// Appends a chunk; returns its index.
    pub(crate) fn push_chunk(&mut self, chunk: Value) -> Option<usize> {
        if self.is_terminal() {
            return None;
        }
        self.status = TaskStatus::Streaming;
        self.chunks.push(chunk);
        Some(self.chunks.len() - 1)
    }

    pub(crate) fn schedule_retry(&mut self, error: &TaskError) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = TaskStatus::RetryScheduled;
        self.error = Some(error.as_message());
        true
    }

    pub(crate) fn complete(&mut self, output: Value) -> bool {
        self.settle(TaskStatus::Completed, |r| {
            r.output = Some(output);
            r.error = None;
        })
    }

    pub(crate) fn fail(&mut self, error: &TaskError) -> bool {
        self.settle(TaskStatus::Failed, |r| r.error = Some(error.as_message()))
    }

    pub(crate) fn cancel(&mut self, reason: &str) -> bool {
        self.settle(TaskStatus::Cancelled, |r| r.error = Some(reason.to_string()))
    }

    fn settle(&mut self, status: TaskStatus, apply: impl FnOnce(&mut Self)) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = status;
        self.ended_at = Some(Utc::now());
        self.settled_at = Some(Instant::now());
        apply(self);
        true
    }

    /// Output of a streaming attempt: concatenated text if every chunk is a
    /// string, otherwise the chunk array.
    pub fn stream_output(&self) -> Value {
        if !self.chunks.is_empty() && self.chunks.iter().all(Value::is_string) {
            let text: String = self.chunks.iter().filter_map(Value::as_str).collect();
            Value::String(text)
        } else {
            Value::Array(self.chunks.clone())
        }
    }

    /// Returns `true` if the record is terminal and older than `retention` at `now`.
    pub(crate) fn is_expired(&self, now: Instant, retention: std::time::Duration) -> bool {
        self.settled_at
            .is_some_and(|at| now.saturating_duration_since(at) >= retention)
    }
}

/// Filter for [`Orchestrator::list`](crate::Orchestrator::list).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskFilter {
    /// Keep only records in this status.
    pub status: Option<TaskStatus>,
    /// Keep only records carrying this label.
    pub label: Option<String>,
    /// Keep only records of this handler.
    pub name: Option<String>,
}

impl TaskFilter {
    /// Matches everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts to `status`.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Restricts to records labelled `label`.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Restricts to handler `name`.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns `true` if `record` passes every set criterion.
    pub fn matches(&self, record: &TaskRecord) -> bool {
        self.status.is_none_or(|s| record.status == s)
            && self
                .label
                .as_ref()
                .is_none_or(|l| record.labels.iter().any(|x| x == l))
            && self.name.as_ref().is_none_or(|n| &record.name == n)
    }
}
