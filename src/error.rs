//! Error types used by the orchestrator and by task handlers.
//!
//! This module defines two main error enums:
//!
//! - [`OrchestratorError`]: administrative errors surfaced synchronously to API callers.
//! - [`TaskError`]: errors raised by individual handler executions.
//!
//! Both types provide helper methods (`as_label`, `as_message`) for logging/metrics
//! and additional utilities such as [`TaskError::is_retryable`].

use std::time::Duration;
use thiserror::Error;

use crate::tasks::TaskId;

/// # Errors produced by the orchestrator API.
///
/// These never describe a handler failure: execution-time failures are only
/// visible through task status and the event bus.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    /// No handler is registered under the given name.
    #[error("unknown task '{name}'")]
    UnknownTask {
        /// The name that failed to resolve.
        name: String,
    },

    /// A handler with the same name was already registered.
    #[error("task '{name}' is already registered")]
    DuplicateName {
        /// The conflicting name.
        name: String,
    },

    /// No pool with the given name exists.
    #[error("unknown pool '{name}'")]
    UnknownPool {
        /// The pool name that failed to resolve.
        name: String,
    },

    /// The task id is unknown or its record was purged after the retention window.
    #[error("task {task_id} not found")]
    NotFound {
        /// The id that was looked up.
        task_id: TaskId,
    },

    /// The orchestrator is stopping and no longer accepts submissions.
    #[error("orchestrator is shutting down")]
    ShuttingDown,

    /// Draining did not finish within the grace period.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Tasks that were still outstanding.
        stuck: Vec<TaskId>,
    },
}

impl OrchestratorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use taskhive::OrchestratorError;
    ///
    /// let err = OrchestratorError::UnknownPool { name: "gpu".into() };
    /// assert_eq!(err.as_label(), "unknown_pool");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            OrchestratorError::UnknownTask { .. } => "unknown_task",
            OrchestratorError::DuplicateName { .. } => "duplicate_name",
            OrchestratorError::UnknownPool { .. } => "unknown_pool",
            OrchestratorError::NotFound { .. } => "not_found",
            OrchestratorError::ShuttingDown => "shutting_down",
            OrchestratorError::GraceExceeded { .. } => "grace_exceeded",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            OrchestratorError::GraceExceeded { grace, stuck } => {
                format!("grace exceeded after {grace:?}; stuck tasks={}", stuck.len())
            }
            other => other.to_string(),
        }
    }
}

/// # Errors produced by task execution.
///
/// `Fail` is retried according to the envelope's retry budget; every other
/// variant is terminal.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Handler failed but may succeed if retried.
    #[error("execution failed: {reason}")]
    Fail {
        /// The underlying error message.
        reason: String,
    },

    /// Non-recoverable handler error (never retried).
    #[error("fatal error (no retry): {reason}")]
    Fatal {
        /// The underlying error message.
        reason: String,
    },

    /// The task deadline passed before dispatch, or a retry would overrun it.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The task observed its cancellation token.
    #[error("task cancelled")]
    Canceled,
}

impl TaskError {
    /// Shorthand for a retryable [`TaskError::Fail`].
    pub fn fail(reason: impl Into<String>) -> Self {
        TaskError::Fail {
            reason: reason.into(),
        }
    }

    /// Shorthand for a terminal [`TaskError::Fatal`].
    pub fn fatal(reason: impl Into<String>) -> Self {
        TaskError::Fatal {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use taskhive::TaskError;
    ///
    /// assert_eq!(TaskError::DeadlineExceeded.as_label(), "task_deadline_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Fail { .. } => "task_failed",
            TaskError::Fatal { .. } => "task_fatal",
            TaskError::DeadlineExceeded => "task_deadline_exceeded",
            TaskError::Canceled => "task_canceled",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            TaskError::Fail { reason } => format!("error: {reason}"),
            TaskError::Fatal { reason } => format!("fatal: {reason}"),
            TaskError::DeadlineExceeded => "deadline exceeded".to_string(),
            TaskError::Canceled => "cancelled".to_string(),
        }
    }

    /// Indicates whether the error is safe to retry.
    ///
    /// # Example
    /// ```
    /// use taskhive::TaskError;
    ///
    /// assert!(TaskError::fail("boom").is_retryable());
    /// assert!(!TaskError::fatal("nope").is_retryable());
    /// assert!(!TaskError::Canceled.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Fail { .. })
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(e: serde_json::Error) -> Self {
        TaskError::Fatal {
            reason: format!("invalid payload: {e}"),
        }
    }
}
