//! # Worker slot: executes one envelope at a time.
//!
//! ```text
//! loop {
//!   ├─► stop requested?                         ─► exit
//!   ├─► queue.pop_ready(stop)                    (Closed/Interrupted ─► exit)
//!   ├─► record missing or terminal?             ─► skip
//!   ├─► token cancelled?                        ─► CANCELLED
//!   ├─► deadline passed?                        ─► FAILED(DeadlineExceeded)
//!   ├─► registry.resolve(name)                   (unknown ─► FAILED(Fatal))
//!   ├─► RUNNING + publish started
//!   ├─► Single:    call(payload, ctx)            (panic ─► Fail)
//!   │   Streaming: for chunk in stream           (cancel checked between chunks)
//!   │                ├─ record.push_chunk, publish chunk
//!   │                └─ Err ─► stop stream
//!   └─► settle:
//!         token cancelled / Canceled          ─► CANCELLED (result dropped)
//!         Ok(v)                               ─► COMPLETED
//!         Fail, no chunks, retries < max      ─► with_retry ─► RETRY_SCHEDULED + retried, push successor
//!              └─ successor past deadline     ─► FAILED(DeadlineExceeded)
//!         otherwise                           ─► FAILED
//! }
//! ```
//!
//! Handler errors never escape a slot. Scaling down cancels `stop`; the slot
//! exits after finishing its current envelope.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use futures::{FutureExt, StreamExt};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::pool::PoolShared;
use super::store::RecordEntry;
use crate::error::TaskError;
use crate::events::Event;
use crate::subscribers::panic_message;
use crate::tasks::{ScheduledTask, StreamHandler, TaskContext, TaskHandler, TaskId};

/// Result of one attempt.
enum Attempt {
    Completed(Value),
    Failed {
        error: TaskError,
        /// Chunks already delivered by this attempt.
        chunks: usize,
    },
}

/// Decrements the counters on drop, even if the attempt future is dropped.
struct BusyGuard<'a> {
    shared: &'a PoolShared,
}

impl<'a> BusyGuard<'a> {
    fn enter(shared: &'a PoolShared) -> Self {
        shared.busy.fetch_add(1, Ordering::Relaxed);
        shared.in_flight.fetch_add(1, Ordering::Relaxed);
        Self { shared }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.shared.busy.fetch_sub(1, Ordering::Relaxed);
        self.shared.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Slot main loop.
pub(crate) async fn run(shared: Arc<PoolShared>, slot: usize, stop: CancellationToken) {
    tracing::debug!(pool = %shared.name, slot, "slot started");
    while !stop.is_cancelled() {
        match shared.queue.pop_ready(&stop).await {
            Ok(task) => execute(&shared, task).await,
            Err(e) => {
                tracing::debug!(pool = %shared.name, slot, reason = %e, "slot leaving queue");
                break;
            }
        }
    }
    tracing::debug!(pool = %shared.name, slot, "slot stopped");
}

async fn execute(shared: &PoolShared, task: ScheduledTask) {
    let task_id = task.task_id();
    let Some(entry) = shared.store.get(task_id) else {
        tracing::debug!(%task_id, "record purged; envelope dropped");
        return;
    };
    if entry.is_terminal() {
        return;
    }
    if entry.token().is_cancelled() {
        cancelled(shared, &entry, task_id, "cancelled before start");
        return;
    }
    if task.is_expired(Instant::now()) {
        failed(shared, &entry, task_id, TaskError::DeadlineExceeded);
        return;
    }
    let handler = match shared.registry.resolve(task.name()) {
        Ok(registered) => registered.handler.clone(),
        Err(e) => {
            failed(shared, &entry, task_id, TaskError::fatal(e.to_string()));
            return;
        }
    };
    if !entry.start_attempt(task.attempt()) {
        return;
    }
    shared
        .bus
        .publish(Event::started(task_id, task.name(), task.attempt()));

    let ctx = TaskContext::new(
        task_id,
        task.name_arc(),
        task.attempt(),
        task.deadline(),
        Arc::clone(task.labels()),
        entry.token().clone(),
    );
    let attempt = {
        let _busy = BusyGuard::enter(shared);
        match handler {
            TaskHandler::Single(h) => {
                let call = h.call(task.payload().clone(), ctx);
                match AssertUnwindSafe(call).catch_unwind().await {
                    Ok(Ok(output)) => Attempt::Completed(output),
                    Ok(Err(error)) => Attempt::Failed { error, chunks: 0 },
                    Err(panic) => Attempt::Failed {
                        error: panicked(panic.as_ref()),
                        chunks: 0,
                    },
                }
            }
            TaskHandler::Streaming(h) => stream(shared, &entry, &task, &h, ctx).await,
        }
    };
    settle(shared, &entry, task, attempt);
}

async fn stream(
    shared: &PoolShared,
    entry: &RecordEntry,
    task: &ScheduledTask,
    handler: &Arc<dyn StreamHandler>,
    ctx: TaskContext,
) -> Attempt {
    let token = ctx.token().clone();
    let created = std::panic::catch_unwind(AssertUnwindSafe(|| {
        handler.stream(task.payload().clone(), ctx)
    }));
    let chunks = match created {
        Ok(s) => s,
        Err(panic) => {
            return Attempt::Failed {
                error: panicked(panic.as_ref()),
                chunks: 0,
            };
        }
    };
    let mut chunks = AssertUnwindSafe(chunks).catch_unwind();
    let mut emitted = 0;

    while let Some(item) = chunks.next().await {
        if token.is_cancelled() {
            return Attempt::Failed {
                error: TaskError::Canceled,
                chunks: emitted,
            };
        }
        match item {
            Ok(Ok(chunk)) => {
                let Some(index) = entry.push_chunk(chunk.clone()) else {
                    return Attempt::Failed {
                        error: TaskError::Canceled,
                        chunks: emitted,
                    };
                };
                shared
                    .bus
                    .publish(Event::chunk(task.task_id(), index, chunk));
                emitted += 1;
            }
            Ok(Err(error)) => {
                return Attempt::Failed {
                    error,
                    chunks: emitted,
                };
            }
            Err(panic) => {
                return Attempt::Failed {
                    error: panicked(panic.as_ref()),
                    chunks: emitted,
                };
            }
        }
    }
    Attempt::Completed(entry.stream_output())
}

fn settle(shared: &PoolShared, entry: &RecordEntry, task: ScheduledTask, attempt: Attempt) {
    if entry.token().is_cancelled() {
        cancelled(shared, entry, task.task_id(), "cancelled");
        return;
    }
    match attempt {
        Attempt::Completed(output) => {
            if let Some(attempts) = entry.complete(output.clone()) {
                shared
                    .bus
                    .publish(Event::completed(task.task_id(), attempts, &output));
            }
        }
        Attempt::Failed {
            error: TaskError::Canceled,
            ..
        } => cancelled(shared, entry, task.task_id(), "handler cancelled"),
        Attempt::Failed { error, chunks } => {
            if error.is_retryable() && chunks == 0 && task.can_retry() {
                retry(shared, entry, task, error);
            } else {
                failed(shared, entry, task.task_id(), error);
            }
        }
    }
}

fn retry(shared: &PoolShared, entry: &RecordEntry, task: ScheduledTask, error: TaskError) {
    let task_id = task.task_id();
    let attempt = task.attempt();
    let now = Instant::now();
    let next = match task.with_retry(now) {
        Ok(next) => next,
        Err(suppressed) => {
            tracing::debug!(%task_id, attempt, "retry would overrun deadline");
            failed(shared, entry, task_id, suppressed);
            return;
        }
    };
    if !entry.schedule_retry(&error) {
        return;
    }
    let delay = next.scheduled_at().saturating_duration_since(now);
    tracing::debug!(%task_id, attempt, ?delay, error = %error, "retry scheduled");
    shared
        .bus
        .publish(Event::retried(task_id, attempt, delay, &error));
    if shared.queue.push(next).is_err() {
        cancelled(shared, entry, task_id, "orchestrator stopped");
    } else if entry.token().is_cancelled() {
        shared.queue.remove(task_id);
        cancelled(shared, entry, task_id, "cancelled");
    }
}

fn failed(shared: &PoolShared, entry: &RecordEntry, task_id: TaskId, error: TaskError) {
    if let Some(attempts) = entry.fail(&error) {
        tracing::debug!(%task_id, attempts, reason = error.as_label(), "task failed");
        shared.bus.publish(Event::failed(task_id, attempts, &error));
    }
}

fn cancelled(shared: &PoolShared, entry: &RecordEntry, task_id: TaskId, reason: &str) {
    if let Some(attempts) = entry.cancel(reason) {
        shared.bus.publish(Event::cancelled(task_id, attempts, reason));
    }
}

fn panicked(panic: &(dyn std::any::Any + Send)) -> TaskError {
    TaskError::fail(format!("handler panicked: {}", panic_message(panic)))
}
