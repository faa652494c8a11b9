//! # Worker pools.
//!
//! A [`WorkerPool`] is a named set of slots bound to one queue partition.
//! It may serve several categories. Slots are tokio tasks running
//! [`slot::run`](super::slot::run), each with its own stop token (a child of
//! the orchestrator's runtime token).
//!
//! ## Scaling
//! ```text
//! scale(n) ─┬─ n > active ─► spawn (n - active) slots
//!           └─ n < active ─► cancel stop tokens of the newest slots
//!                            (they exit after their current envelope)
//! ```
//! Before `start()` only the target size is recorded.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::slot;
use super::store::RecordStore;
use crate::events::Broadcaster;
use crate::queue::PriorityTaskQueue;
use crate::tasks::{TaskCategory, TaskRegistry};

/// State shared by every slot of one pool.
pub(crate) struct PoolShared {
    pub(crate) name: Arc<str>,
    pub(crate) queue: Arc<PriorityTaskQueue>,
    pub(crate) registry: Arc<TaskRegistry>,
    pub(crate) store: Arc<RecordStore>,
    pub(crate) bus: Arc<dyn Broadcaster>,
    /// Slots of this pool currently executing a handler.
    pub(crate) busy: AtomicUsize,
    /// Executions across all pools (feeds admission).
    pub(crate) in_flight: Arc<AtomicUsize>,
}

/// Point-in-time view of a pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Pool name.
    pub name: String,
    /// Target number of slots.
    pub size: usize,
    /// Slots executing a handler right now.
    pub busy: usize,
    /// Envelopes waiting in the pool's queue (ready and delayed).
    pub queued: usize,
    /// Categories routed to this pool.
    pub categories: Vec<TaskCategory>,
}

struct SlotHandle {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Slots {
    target: usize,
    active: Vec<SlotHandle>,
    retired: Vec<JoinHandle<()>>,
    parent: Option<CancellationToken>,
    next_id: usize,
}

pub(crate) struct WorkerPool {
    shared: Arc<PoolShared>,
    categories: Vec<TaskCategory>,
    slots: Mutex<Slots>,
}

impl WorkerPool {
    pub(crate) fn new(shared: PoolShared, size: usize, categories: Vec<TaskCategory>) -> Self {
        Self {
            shared: Arc::new(shared),
            categories,
            slots: Mutex::new(Slots {
                target: size,
                ..Slots::default()
            }),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.shared.name
    }

    pub(crate) fn queue(&self) -> &PriorityTaskQueue {
        &self.shared.queue
    }

    /// Spawns the target number of slots under `parent`. No-op if already started.
    pub(crate) fn start(&self, parent: &CancellationToken) {
        let mut slots = self.slots.lock();
        if slots.parent.is_some() {
            return;
        }
        slots.parent = Some(parent.clone());
        let target = slots.target;
        self.resize(&mut slots, target);
        tracing::debug!(pool = %self.shared.name, size = target, "pool started");
    }

    /// Sets the target size; applied immediately if the pool is running.
    pub(crate) fn scale(&self, n: usize) {
        let mut slots = self.slots.lock();
        let from = slots.target;
        slots.target = n;
        if slots.parent.is_some() {
            self.resize(&mut slots, n);
        }
        tracing::debug!(pool = %self.shared.name, from, to = n, "pool scaled");
    }

    fn resize(&self, slots: &mut Slots, n: usize) {
        let Some(parent) = slots.parent.clone() else {
            return;
        };
        slots.retired.retain(|handle| !handle.is_finished());
        while slots.active.len() < n {
            let id = slots.next_id;
            slots.next_id += 1;
            let stop = parent.child_token();
            let handle = tokio::spawn(slot::run(Arc::clone(&self.shared), id, stop.clone()));
            slots.active.push(SlotHandle { stop, handle });
        }
        while slots.active.len() > n {
            if let Some(retiring) = slots.active.pop() {
                retiring.stop.cancel();
                slots.retired.push(retiring.handle);
            }
        }
    }

    pub(crate) fn status(&self) -> PoolStatus {
        let size = self.slots.lock().target;
        PoolStatus {
            name: self.shared.name.to_string(),
            size,
            busy: self.shared.busy.load(Ordering::Relaxed),
            queued: self.shared.queue.len(),
            categories: self.categories.clone(),
        }
    }

    /// Takes every slot handle (active and retired) for joining.
    pub(crate) fn take_handles(&self) -> Vec<JoinHandle<()>> {
        let mut slots = self.slots.lock();
        let mut handles: Vec<JoinHandle<()>> = std::mem::take(&mut slots.retired);
        handles.extend(slots.active.drain(..).map(|s| s.handle));
        handles
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::Instant;

    use super::*;
    use crate::core::record::TaskRecord;
    use crate::events::Bus;
    use crate::policies::RetryPolicy;
    use crate::tasks::{Priority, ScheduledTask, TaskHandler, TaskId, TaskMetadata};

    fn pool(size: usize, registry: TaskRegistry) -> (WorkerPool, Arc<RecordStore>) {
        let store = Arc::new(RecordStore::new());
        let shared = PoolShared {
            name: Arc::from("tool"),
            queue: Arc::new(PriorityTaskQueue::new()),
            registry: Arc::new(registry),
            store: Arc::clone(&store),
            bus: Arc::new(Bus::new(64)),
            busy: AtomicUsize::new(0),
            in_flight: Arc::new(AtomicUsize::new(0)),
        };
        (
            WorkerPool::new(shared, size, vec![TaskCategory::Tool]),
            store,
        )
    }

    fn submit(pool: &WorkerPool, store: &RecordStore, name: &str) -> TaskId {
        let id = TaskId::new();
        let record = TaskRecord::pending(id, name, Priority::Normal, vec![]);
        store.insert(record, CancellationToken::new(), 0);
        let env = ScheduledTask::new(
            id,
            name,
            json!(null),
            Priority::Normal,
            RetryPolicy::default(),
            Instant::now(),
        );
        pool.queue().push(env).unwrap();
        id
    }

    #[tokio::test]
    async fn test_scale_before_start_only_sets_target() {
        let (pool, _) = pool(2, TaskRegistry::builder().build());
        pool.scale(5);
        assert_eq!(pool.status().size, 5);
        assert!(pool.take_handles().is_empty());

        let token = CancellationToken::new();
        pool.start(&token);
        pool.start(&token);
        assert_eq!(pool.take_handles().len(), 5);
        token.cancel();
    }

    #[tokio::test]
    async fn test_shrink_lets_running_task_finish() {
        let registry = TaskRegistry::builder()
            .register(
                "slow",
                TaskHandler::single(|_p, _ctx| async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(json!("done"))
                }),
                TaskMetadata::new(TaskCategory::Tool),
            )
            .unwrap()
            .build();
        let (pool, store) = pool(1, registry);
        let token = CancellationToken::new();
        pool.start(&token);

        let id = submit(&pool, &store, "slow");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.status().busy, 1);

        pool.scale(0);
        for handle in pool.take_handles() {
            handle.await.unwrap();
        }
        let record = store.get(id).unwrap().snapshot();
        assert_eq!(record.output, Some(json!("done")));
        assert_eq!(pool.status().busy, 0);
    }

    #[tokio::test]
    async fn test_resize_forgets_finished_retired_slots() {
        let (pool, _) = pool(3, TaskRegistry::builder().build());
        let token = CancellationToken::new();
        pool.start(&token);

        pool.scale(1);
        assert_eq!(pool.slots.lock().retired.len(), 2);
        tokio::time::sleep(Duration::from_millis(10)).await;

        pool.scale(2);
        pool.scale(1);
        assert_eq!(pool.slots.lock().retired.len(), 1);
        assert_eq!(pool.take_handles().len(), 2);
        token.cancel();
    }
}
