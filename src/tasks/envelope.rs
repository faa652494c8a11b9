//! # Scheduled task envelope.
//!
//! A [`ScheduledTask`] is one schedulable attempt of a task. It carries:
//! - ordering keys: `priority`, `scheduled_at`, `sequence`;
//! - retry state: `retries` and the [`RetryPolicy`];
//! - an optional absolute `deadline`;
//! - the handler name, labels and the opaque payload.
//!
//! ## Ordering
//! Envelopes are ordered by `(priority, scheduled_at, sequence)` compared
//! lexicographically; `task_id` is carried but never compared. `sequence`
//! comes from a process-wide counter, so equal priority and time resolve FIFO.
//!
//! ## Retry
//! ```text
//! envelope(retries=n, seq=s) ── with_retry(now) ──► envelope(retries=n+1,
//!                                                            scheduled_at=now+next_retry_delay(),
//!                                                            seq=s+RETRY_SEQUENCE_STRIDE)
//!                            └─ deadline < scheduled_at + estimated ──► Err(DeadlineExceeded)
//! ```

use std::cmp::Ordering;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use crate::error::TaskError;
use crate::policies::RetryPolicy;
use crate::tasks::{Priority, TaskId};

/// Global sequence counter for envelope ordering.
static ENVELOPE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Offset added to a retry's sequence number.
///
/// Keeps retries behind fresh submissions of equal priority and time while
/// preserving the relative order of retries among themselves.
pub const RETRY_SEQUENCE_STRIDE: u64 = 1 << 32;

fn next_sequence() -> u64 {
    ENVELOPE_SEQ.fetch_add(1, AtomicOrdering::Relaxed)
}

/// One schedulable attempt of a task.
#[derive(Clone, Debug)]
pub struct ScheduledTask {
    task_id: TaskId,
    name: Arc<str>,
    priority: Priority,
    scheduled_at: Instant,
    sequence: u64,
    retries: u32,
    retry: RetryPolicy,
    deadline: Option<Instant>,
    estimated_duration: Option<Duration>,
    labels: Arc<[String]>,
    payload: Value,
}

impl ScheduledTask {
    /// Creates the first envelope of a task, eligible immediately (`scheduled_at = now`).
    pub fn new(
        task_id: TaskId,
        name: impl Into<Arc<str>>,
        payload: Value,
        priority: Priority,
        retry: RetryPolicy,
        now: Instant,
    ) -> Self {
        Self {
            task_id,
            name: name.into(),
            priority,
            scheduled_at: now,
            sequence: next_sequence(),
            retries: 0,
            retry,
            deadline: None,
            estimated_duration: None,
            labels: Arc::from(Vec::new()),
            payload,
        }
    }

    /// Sets the absolute deadline.
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Sets the expected duration of one attempt.
    pub fn with_estimated_duration(mut self, d: Option<Duration>) -> Self {
        self.estimated_duration = d;
        self
    }

    /// Sets the labels.
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = Arc::from(labels);
        self
    }

    /// Moves the earliest eligible time to `at` (never earlier than now-scheduled).
    pub fn defer_until(mut self, at: Instant) -> Self {
        if at > self.scheduled_at {
            self.scheduled_at = at;
        }
        self
    }

    /// Task id (shared by all attempts).
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Registered handler name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// Scheduling priority.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Earliest eligible execution time.
    pub fn scheduled_at(&self) -> Instant {
        self.scheduled_at
    }

    /// FIFO tie-breaker.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Retries already used (0 for the first attempt).
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Attempt number this envelope represents (1-based).
    pub fn attempt(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Retry budget and backoff.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Absolute deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Labels given at submission.
    pub fn labels(&self) -> &Arc<[String]> {
        &self.labels
    }

    /// Handler payload.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Returns `true` if `scheduled_at <= now`.
    #[inline]
    pub fn is_ready(&self, now: Instant) -> bool {
        self.scheduled_at <= now
    }

    /// Returns `true` if the deadline has passed at `now`.
    #[inline]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    /// Returns `true` if the retry budget permits another attempt.
    #[inline]
    pub fn can_retry(&self) -> bool {
        self.retry.allows(self.retries)
    }

    /// Delay before the next retry: `backoff.next(retries + 1)` (jittered, floored).
    pub fn next_retry_delay(&self) -> Duration {
        self.retry.backoff.next(self.retries.saturating_add(1))
    }

    /// Builds the successor envelope for a retry.
    ///
    /// Fails with [`TaskError::DeadlineExceeded`] when the successor could not
    /// finish before the deadline (`scheduled_at + estimated_duration > deadline`).
    /// Does not check the retry budget; see [`ScheduledTask::can_retry`].
    pub fn with_retry(self, now: Instant) -> Result<Self, TaskError> {
        let scheduled_at = now + self.next_retry_delay();
        if let Some(deadline) = self.deadline {
            let finish = scheduled_at.checked_add(self.estimated_duration.unwrap_or_default());
            if finish.is_none_or(|finish| finish > deadline) {
                return Err(TaskError::DeadlineExceeded);
            }
        }
        Ok(Self {
            retries: self.retries.saturating_add(1),
            scheduled_at,
            sequence: self.sequence.saturating_add(RETRY_SEQUENCE_STRIDE),
            ..self
        })
    }

    /// Total order used by the ready queue: `(priority, scheduled_at, sequence)`.
    pub fn schedule_cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.scheduled_at.cmp(&other.scheduled_at))
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}
