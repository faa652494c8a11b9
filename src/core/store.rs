//! # In-memory record store.
//!
//! One [`RecordEntry`] per task id: the record itself behind a short
//! `parking_lot` lock, the task's cancellation token, the index of the pool
//! serving it, and a [`Notify`] fired on every change (used by `wait` and
//! `stream`). A store-wide `Notify` fires whenever any record settles (used
//! by draining shutdown).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::record::{TaskFilter, TaskRecord};
use crate::error::TaskError;
use crate::tasks::TaskId;

pub(crate) struct RecordEntry {
    record: Mutex<TaskRecord>,
    token: CancellationToken,
    pool: usize,
    changed: Notify,
    settled: Arc<Notify>,
}

impl RecordEntry {
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn pool(&self) -> usize {
        self.pool
    }

    pub(crate) fn snapshot(&self) -> TaskRecord {
        self.record.lock().clone()
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.record.lock().is_terminal()
    }

    /// Applies `f` under the record lock and wakes watchers.
    fn update<R>(&self, f: impl FnOnce(&mut TaskRecord) -> R) -> R {
        let out = f(&mut self.record.lock());
        self.changed.notify_waiters();
        out
    }

    /// Like [`RecordEntry::update`] for terminal transitions; also wakes drainers.
    fn settle(&self, f: impl FnOnce(&mut TaskRecord) -> bool) -> bool {
        let settled = self.update(f);
        if settled {
            self.settled.notify_waiters();
        }
        settled
    }

    pub(crate) fn start_attempt(&self, attempt: u32) -> bool {
        self.update(|r| r.start_attempt(attempt))
    }

    pub(crate) fn push_chunk(&self, chunk: Value) -> Option<usize> {
        self.update(|r| r.push_chunk(chunk))
    }

    pub(crate) fn schedule_retry(&self, error: &TaskError) -> bool {
        self.update(|r| r.schedule_retry(error))
    }

    pub(crate) fn stream_output(&self) -> Value {
        self.record.lock().stream_output()
    }

    /// Settles as `Completed`; returns the attempt count on success.
    pub(crate) fn complete(&self, output: Value) -> Option<u32> {
        let mut attempts = None;
        self.settle(|r| {
            let done = r.complete(output);
            if done {
                attempts = Some(r.attempts);
            }
            done
        });
        attempts
    }

    pub(crate) fn fail(&self, error: &TaskError) -> Option<u32> {
        let mut attempts = None;
        self.settle(|r| {
            let done = r.fail(error);
            if done {
                attempts = Some(r.attempts);
            }
            done
        });
        attempts
    }

    /// Settles as `Cancelled` if the task is still queued (not executing).
    pub(crate) fn cancel_if_queued(&self, reason: &str) -> Option<u32> {
        let mut attempts = None;
        self.settle(|r| {
            let done = r.status.is_queued() && r.cancel(reason);
            if done {
                attempts = Some(r.attempts);
            }
            done
        });
        attempts
    }

    pub(crate) fn cancel(&self, reason: &str) -> Option<u32> {
        let mut attempts = None;
        self.settle(|r| {
            let done = r.cancel(reason);
            if done {
                attempts = Some(r.attempts);
            }
            done
        });
        attempts
    }

    /// Waits until `probe` returns `Some` for the current record.
    pub(crate) async fn wait_for<T>(&self, mut probe: impl FnMut(&TaskRecord) -> Option<T>) -> T {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(out) = probe(&self.record.lock()) {
                return out;
            }
            notified.await;
        }
    }
}

/// All task records of one orchestrator.
pub(crate) struct RecordStore {
    entries: RwLock<HashMap<TaskId, Arc<RecordEntry>>>,
    settled: Arc<Notify>,
}

impl RecordStore {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            settled: Arc::new(Notify::new()),
        }
    }

    pub(crate) fn insert(
        &self,
        record: TaskRecord,
        token: CancellationToken,
        pool: usize,
    ) -> Arc<RecordEntry> {
        let id = record.task_id;
        let entry = Arc::new(RecordEntry {
            record: Mutex::new(record),
            token,
            pool,
            changed: Notify::new(),
            settled: Arc::clone(&self.settled),
        });
        self.entries.write().insert(id, Arc::clone(&entry));
        entry
    }

    pub(crate) fn get(&self, id: TaskId) -> Option<Arc<RecordEntry>> {
        self.entries.read().get(&id).cloned()
    }

    pub(crate) fn remove(&self, id: TaskId) {
        self.entries.write().remove(&id);
    }

    /// Records matching `filter`, oldest first.
    pub(crate) fn list(&self, filter: &TaskFilter) -> Vec<TaskRecord> {
        let entries: Vec<Arc<RecordEntry>> = self.entries.read().values().cloned().collect();
        let mut out: Vec<TaskRecord> = entries
            .iter()
            .map(|e| e.snapshot())
            .filter(|r| filter.matches(r))
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    /// Entries whose record is not terminal yet.
    pub(crate) fn outstanding(&self) -> Vec<Arc<RecordEntry>> {
        let entries: Vec<Arc<RecordEntry>> = self.entries.read().values().cloned().collect();
        entries.into_iter().filter(|e| !e.is_terminal()).collect()
    }

    /// Completes once every record is terminal.
    pub(crate) async fn wait_settled(&self) {
        loop {
            let notified = self.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.outstanding().is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Drops terminal records settled at least `retention` ago; returns how many.
    pub(crate) fn purge_expired(&self, now: Instant, retention: Duration) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| !e.record.lock().is_expired(now, retention));
        before - entries.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }
}
