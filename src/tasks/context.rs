//! # Per-attempt handler context.
//!
//! Every handler invocation receives a [`TaskContext`]. It carries the
//! task identity, the attempt number, the optional deadline and the task's
//! [`CancellationToken`]. Cancellation is cooperative: long-running handlers
//! should call [`TaskContext::checkpoint`] (or race [`TaskContext::cancelled`])
//! between units of work.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;
use crate::tasks::TaskId;

/// Context handed to a handler for one attempt.
#[derive(Clone, Debug)]
pub struct TaskContext {
    task_id: TaskId,
    name: Arc<str>,
    attempt: u32,
    deadline: Option<Instant>,
    labels: Arc<[String]>,
    token: CancellationToken,
}

impl TaskContext {
    pub(crate) fn new(
        task_id: TaskId,
        name: Arc<str>,
        attempt: u32,
        deadline: Option<Instant>,
        labels: Arc<[String]>,
        token: CancellationToken,
    ) -> Self {
        Self {
            task_id,
            name,
            attempt,
            deadline,
            labels,
            token,
        }
    }

    /// Id of the task being executed.
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Registered handler name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attempt number (1-based).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Labels given at submission.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Absolute deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline (`None` = no deadline).
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Returns `true` once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes when cancellation is requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Cooperative checkpoint: `Err(Canceled)` once cancellation was requested.
    ///
    /// ```rust,ignore
    /// for item in batch {
    ///     ctx.checkpoint()?;
    ///     process(item).await?;
    /// }
    /// ```
    pub fn checkpoint(&self) -> Result<(), TaskError> {
        if self.token.is_cancelled() {
            Err(TaskError::Canceled)
        } else {
            Ok(())
        }
    }

    /// The underlying token, for handing to nested work.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(token: CancellationToken, deadline: Option<Instant>) -> TaskContext {
        TaskContext::new(
            TaskId::new(),
            Arc::from("probe"),
            1,
            deadline,
            Arc::from(vec!["a".to_string()]),
            token,
        )
    }

    #[test]
    fn test_checkpoint_observes_cancel() {
        let token = CancellationToken::new();
        let c = ctx(token.clone(), None);
        assert!(c.checkpoint().is_ok());
        token.cancel();
        assert_eq!(c.checkpoint(), Err(TaskError::Canceled));
        assert!(c.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_counts_down() {
        let c = ctx(
            CancellationToken::new(),
            Some(Instant::now() + Duration::from_secs(5)),
        );
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(c.remaining(), Some(Duration::from_secs(3)));
        assert_eq!(c.labels(), ["a".to_string()]);
    }
}
