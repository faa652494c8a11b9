//! # Static task metadata.
//!
//! [`TaskMetadata`] is attached to a handler at registration time and never
//! changes afterwards. It tells the orchestrator:
//! - which pool category serves the task ([`TaskCategory`]);
//! - the default [`Priority`] and retry budget for submissions that don't override them;
//! - an estimated duration, used by the deadline check on retry and for display.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Scheduling priority. Lower ordinal sorts (and runs) first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    /// Latency-critical work; never throttled.
    Critical = 0,
    /// Interactive work; never throttled.
    High = 1,
    /// Regular work (default).
    #[default]
    Normal = 2,
    /// Background work; first to be deferred under load.
    Low = 3,
}

impl Priority {
    /// All tiers, highest first.
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    /// Returns `true` for tiers that admission throttling may defer.
    #[inline]
    pub fn is_throttleable(&self) -> bool {
        matches!(self, Priority::Normal | Priority::Low)
    }

    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Pool category a handler is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskCategory {
    /// Language-model calls: few, slow, expensive.
    Llm,
    /// Tool invocations: many, short.
    Tool,
    /// Housekeeping and batch work.
    #[default]
    Background,
}

impl TaskCategory {
    /// All categories.
    pub const ALL: [TaskCategory; 3] = [
        TaskCategory::Llm,
        TaskCategory::Tool,
        TaskCategory::Background,
    ];

    /// Returns the lowercase name, also used as the default pool name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskCategory::Llm => "llm",
            TaskCategory::Tool => "tool",
            TaskCategory::Background => "background",
        }
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "llm" => Ok(TaskCategory::Llm),
            "tool" => Ok(TaskCategory::Tool),
            "background" => Ok(TaskCategory::Background),
            other => Err(format!("unknown task category '{other}'")),
        }
    }
}

/// Static descriptor attached to a handler at registration.
///
/// ## Example
/// ```rust
/// use std::time::Duration;
/// use taskhive::{Priority, TaskCategory, TaskMetadata};
///
/// let meta = TaskMetadata::new(TaskCategory::Llm)
///     .with_priority(Priority::High)
///     .with_max_retries(1)
///     .with_estimated_duration(Duration::from_secs(20));
///
/// assert_eq!(meta.category, TaskCategory::Llm);
/// assert_eq!(meta.max_retries, Some(1));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct TaskMetadata {
    /// Pool category.
    pub category: TaskCategory,
    /// Default priority for submissions.
    pub priority: Priority,
    /// Default retry budget (`None` = orchestrator default).
    pub max_retries: Option<u32>,
    /// Expected run time of one attempt.
    pub estimated_duration: Option<Duration>,
    /// Free-form description for operators.
    pub description: Option<String>,
}

impl TaskMetadata {
    /// Creates metadata for the given category with default priority.
    pub fn new(category: TaskCategory) -> Self {
        Self {
            category,
            ..Self::default()
        }
    }

    /// Sets the default priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the default retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Sets the estimated duration of one attempt.
    pub fn with_estimated_duration(mut self, d: Duration) -> Self {
        self.estimated_duration = Some(d);
        self
    }

    /// Sets a description.
    pub fn with_description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }
}
