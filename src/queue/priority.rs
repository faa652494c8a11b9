//! # Time-aware priority queue.
//!
//! [`PriorityTaskQueue`] keeps two heaps behind one short `parking_lot` lock:
//! - **ready**: envelopes eligible now, ordered by `(priority, scheduled_at, sequence)`;
//! - **delayed**: envelopes with `scheduled_at` in the future, ordered by `scheduled_at`.
//!
//! [`PriorityTaskQueue::pop_ready`] promotes matured delayed envelopes and hands
//! out the best ready one. When nothing is ready it parks (lock released) until
//! a push, the earliest delayed envelope maturing, close, or the caller's stop token.
//!
//! ## Rules
//! - Lower priority ordinal pops first regardless of insertion order.
//! - Equal priority and `scheduled_at` pop in sequence (submission) order.
//! - A closed queue rejects pushes but still hands out what is already ready.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::tasks::{ScheduledTask, TaskId};

/// Why [`PriorityTaskQueue::pop_ready`] or [`PriorityTaskQueue::push`] did not deliver.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The queue was closed (and, for pops, nothing ready remains).
    #[error("queue closed")]
    Closed,
    /// The caller's stop token fired while waiting.
    #[error("pop interrupted")]
    Interrupted,
}

/// Ready-heap entry; `BinaryHeap` is a max-heap so the order is reversed.
struct Ready(ScheduledTask);

impl Ord for Ready {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.schedule_cmp(&self.0)
    }
}

impl PartialOrd for Ready {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Ready {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ready {}

/// Delayed-heap entry: earliest `scheduled_at` on top.
struct Delayed(ScheduledTask);

impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .0
            .scheduled_at()
            .cmp(&self.0.scheduled_at())
            .then_with(|| other.0.sequence().cmp(&self.0.sequence()))
    }
}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Delayed {}

#[derive(Default)]
struct Heaps {
    ready: BinaryHeap<Ready>,
    delayed: BinaryHeap<Delayed>,
    closed: bool,
}

impl Heaps {
    /// Moves every delayed envelope with `scheduled_at <= now` to the ready heap.
    fn promote(&mut self, now: Instant) {
        while self
            .delayed
            .peek()
            .is_some_and(|Delayed(task)| task.is_ready(now))
        {
            if let Some(Delayed(task)) = self.delayed.pop() {
                self.ready.push(Ready(task));
            }
        }
    }
}

/// Thread-safe, time-aware priority queue of envelopes.
#[derive(Default)]
pub struct PriorityTaskQueue {
    heaps: Mutex<Heaps>,
    notify: Notify,
}

impl PriorityTaskQueue {
    /// Creates an empty open queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues an envelope; wakes one waiting consumer.
    ///
    /// Returns the envelope back inside `Err` if the queue is closed.
    pub fn push(&self, task: ScheduledTask) -> Result<(), (QueueError, ScheduledTask)> {
        {
            let mut heaps = self.heaps.lock();
            if heaps.closed {
                return Err((QueueError::Closed, task));
            }
            if task.is_ready(Instant::now()) {
                heaps.ready.push(Ready(task));
            } else {
                heaps.delayed.push(Delayed(task));
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Pops the best ready envelope, waiting until one becomes ready.
    ///
    /// # Errors
    /// - [`QueueError::Closed`] once the queue is closed and nothing is ready;
    /// - [`QueueError::Interrupted`] if `stop` fires while waiting.
    pub async fn pop_ready(&self, stop: &CancellationToken) -> Result<ScheduledTask, QueueError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let mut heaps = self.heaps.lock();
                heaps.promote(Instant::now());
                if let Some(Ready(task)) = heaps.ready.pop() {
                    return Ok(task);
                }
                if heaps.closed {
                    return Err(QueueError::Closed);
                }
                heaps.delayed.peek().map(|Delayed(task)| task.scheduled_at())
            };

            tokio::select! {
                _ = stop.cancelled() => return Err(QueueError::Interrupted),
                _ = &mut notified => {}
                _ = sleep_until_some(wake_at) => {}
            }
        }
    }

    /// Non-blocking variant of [`PriorityTaskQueue::pop_ready`].
    pub fn try_pop_ready(&self) -> Option<ScheduledTask> {
        let mut heaps = self.heaps.lock();
        heaps.promote(Instant::now());
        heaps.ready.pop().map(|Ready(task)| task)
    }

    /// Removes every envelope of `task_id`; returns how many were dropped.
    pub fn remove(&self, task_id: TaskId) -> usize {
        let mut heaps = self.heaps.lock();
        let before = heaps.ready.len() + heaps.delayed.len();
        heaps.ready.retain(|Ready(t)| t.task_id() != task_id);
        heaps.delayed.retain(|Delayed(t)| t.task_id() != task_id);
        before - (heaps.ready.len() + heaps.delayed.len())
    }

    /// Takes every queued envelope out of the queue (ready and delayed).
    pub fn drain(&self) -> Vec<ScheduledTask> {
        let mut heaps = self.heaps.lock();
        let ready = std::mem::take(&mut heaps.ready);
        let delayed = std::mem::take(&mut heaps.delayed);
        ready
            .into_iter()
            .map(|Ready(t)| t)
            .chain(delayed.into_iter().map(|Delayed(t)| t))
            .collect()
    }

    /// Closes the queue and wakes every waiting consumer.
    pub fn close(&self) {
        self.heaps.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Returns `true` once [`PriorityTaskQueue::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.heaps.lock().closed
    }

    /// Number of queued envelopes (ready + delayed).
    pub fn len(&self) -> usize {
        let heaps = self.heaps.lock();
        heaps.ready.len() + heaps.delayed.len()
    }

    /// Returns `true` if no envelope is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn sleep_until_some(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
