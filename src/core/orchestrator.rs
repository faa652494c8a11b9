//! # Orchestrator: submission, control and lifecycle.
//!
//! The [`Orchestrator`] wires the registry, one queue partition per pool, the
//! worker pools, the record store and the broadcaster together.
//!
//! ## High-level architecture
//! ```text
//! submit(name, payload, opts)
//!   ├─ registry.resolve(name)                 (UnknownTask)
//!   ├─ ScheduledTask { priority, retry, deadline, labels }
//!   ├─ admission.admit(env, in_flight)        (maybe deferred)
//!   ├─ store.insert(PENDING, task token)
//!   ├─ publish submitted
//!   └─ pools[route(category)].queue.push(env)
//!
//! pool slots ── pop_ready ──► execute ──► record + events
//!
//! cancel(id)  ─► token.cancel(); queued → CANCELLED now, running → cooperative
//! stop(drain) ─► reject submissions
//!               ├─ drain: wait (≤ grace) until every record is terminal
//!               └─ else : cancel tokens, close + clear queues, CANCELLED for queued
//!               ─► close queues, stop slots, join (≤ grace)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::builder::OrchestratorBuilder;
use super::config::OrchestratorConfig;
use super::pool::{PoolStatus, WorkerPool};
use super::record::{TaskFilter, TaskRecord};
use super::shutdown;
use super::store::{RecordEntry, RecordStore};
use crate::error::OrchestratorError;
use crate::events::{Broadcaster, Event, EventSubscription};
use crate::queue::Admission;
use crate::tasks::{Priority, ScheduledTask, TaskCategory, TaskId, TaskRegistry};

/// Per-submission overrides of the registered defaults.
#[derive(Clone, Debug, Default)]
pub struct SubmitOptions {
    /// Priority (default: the handler's registered priority).
    pub priority: Option<Priority>,
    /// Retry budget (default: registration, then configuration).
    pub max_retries: Option<u32>,
    /// Absolute instant after which the task must not execute.
    pub deadline: Option<Instant>,
    /// Free-form tags.
    pub labels: Vec<String>,
}

impl SubmitOptions {
    /// Sets the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Sets the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Sets an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets the deadline to `now + timeout`.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Adds a label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }
}

/// Task orchestration façade.
pub struct Orchestrator {
    cfg: OrchestratorConfig,
    registry: Arc<TaskRegistry>,
    store: Arc<RecordStore>,
    bus: Arc<dyn Broadcaster>,
    pools: Vec<WorkerPool>,
    routes: HashMap<TaskCategory, usize>,
    admission: Admission,
    in_flight: Arc<AtomicUsize>,
    accepting: AtomicBool,
    started: AtomicBool,
    /// Parent of every slot stop token and of the janitor.
    runtime_token: CancellationToken,
    /// Parent of every per-task token.
    tasks_token: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
}

pub(crate) struct OrchestratorParts {
    pub(crate) cfg: OrchestratorConfig,
    pub(crate) registry: Arc<TaskRegistry>,
    pub(crate) store: Arc<RecordStore>,
    pub(crate) bus: Arc<dyn Broadcaster>,
    pub(crate) pools: Vec<WorkerPool>,
    pub(crate) routes: HashMap<TaskCategory, usize>,
    pub(crate) admission: Admission,
    pub(crate) in_flight: Arc<AtomicUsize>,
}

impl Orchestrator {
    /// Starts building an orchestrator around `registry`.
    pub fn builder(registry: TaskRegistry) -> OrchestratorBuilder {
        OrchestratorBuilder::new(registry)
    }

    pub(crate) fn from_parts(parts: OrchestratorParts) -> Self {
        Self {
            cfg: parts.cfg,
            registry: parts.registry,
            store: parts.store,
            bus: parts.bus,
            pools: parts.pools,
            routes: parts.routes,
            admission: parts.admission,
            in_flight: parts.in_flight,
            accepting: AtomicBool::new(true),
            started: AtomicBool::new(false),
            runtime_token: CancellationToken::new(),
            tasks_token: CancellationToken::new(),
            background: Mutex::new(Vec::new()),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.cfg
    }

    /// The frozen task registry.
    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Name of the broadcaster transport in use.
    pub fn broadcaster_name(&self) -> &'static str {
        self.bus.name()
    }

    /// Returns `false` once `stop` was called.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Accepts a task for execution and returns its id.
    ///
    /// Execution-time failures are never reported here; use [`Orchestrator::status`],
    /// [`Orchestrator::wait`] or the event bus.
    ///
    /// # Errors
    /// - [`OrchestratorError::UnknownTask`] if `name` is not registered;
    /// - [`OrchestratorError::ShuttingDown`] after [`Orchestrator::stop`].
    pub fn submit(
        &self,
        name: &str,
        payload: Value,
        opts: SubmitOptions,
    ) -> Result<TaskId, OrchestratorError> {
        if !self.is_accepting() {
            return Err(OrchestratorError::ShuttingDown);
        }
        let registered = self.registry.resolve(name)?;
        let meta = &registered.metadata;
        let priority = opts.priority.unwrap_or(meta.priority);
        let retry = self.cfg.retry_policy(opts.max_retries.or(meta.max_retries));
        let pool = self.routes.get(&meta.category).copied().unwrap_or(0);

        let task_id = TaskId::new();
        let now = Instant::now();
        let envelope = ScheduledTask::new(task_id, name, payload, priority, retry, now)
            .with_deadline(opts.deadline)
            .with_estimated_duration(meta.estimated_duration)
            .with_labels(opts.labels.clone());
        let (envelope, deferred) =
            self.admission
                .admit(envelope, self.in_flight.load(Ordering::Relaxed), now);

        let labels = opts.labels;
        let event = Event::submitted(task_id, name, priority, &labels);
        let record = TaskRecord::pending(task_id, name, priority, labels);
        self.store
            .insert(record, self.tasks_token.child_token(), pool);
        self.bus.publish(event);

        if self.pools[pool].queue().push(envelope).is_err() {
            self.store.remove(task_id);
            self.bus
                .publish(Event::cancelled(task_id, 0, "orchestrator stopped"));
            return Err(OrchestratorError::ShuttingDown);
        }
        tracing::debug!(
            %task_id,
            name,
            priority = priority.as_label(),
            pool = self.pools[pool].name(),
            deferred,
            "task submitted"
        );
        Ok(task_id)
    }

    /// Requests cancellation of a task (best effort).
    ///
    /// Queued tasks become `CANCELLED` immediately; running tasks observe the
    /// token cooperatively and their result is dropped. Cancelling a terminal
    /// task is a no-op.
    pub fn cancel(&self, task_id: TaskId) -> Result<(), OrchestratorError> {
        let entry = self.entry(task_id)?;
        if entry.is_terminal() {
            return Ok(());
        }
        entry.token().cancel();
        if let Some(attempts) = entry.cancel_if_queued("cancelled") {
            self.pools[entry.pool()].queue().remove(task_id);
            self.bus
                .publish(Event::cancelled(task_id, attempts, "cancelled"));
        }
        tracing::debug!(%task_id, "cancel requested");
        Ok(())
    }

    /// Current record of a task.
    ///
    /// # Errors
    /// [`OrchestratorError::NotFound`] if the id is unknown or was purged.
    pub fn status(&self, task_id: TaskId) -> Result<TaskRecord, OrchestratorError> {
        Ok(self.entry(task_id)?.snapshot())
    }

    /// Waits until the task is terminal and returns its final record.
    pub async fn wait(&self, task_id: TaskId) -> Result<TaskRecord, OrchestratorError> {
        let entry = self.entry(task_id)?;
        Ok(entry
            .wait_for(|r| r.is_terminal().then(|| r.clone()))
            .await)
    }

    /// Chunk stream of a streaming task: buffered history, then live chunks.
    ///
    /// The stream ends when the task reaches a terminal status.
    pub fn stream(
        &self,
        task_id: TaskId,
    ) -> Result<BoxStream<'static, Value>, OrchestratorError> {
        let entry = self.entry(task_id)?;
        let chunks = stream::unfold((entry, 0usize), |(entry, next)| async move {
            let chunk = entry
                .wait_for(|r| match r.chunks.get(next) {
                    Some(chunk) => Some(Some(chunk.clone())),
                    None if r.is_terminal() => Some(None),
                    None => None,
                })
                .await?;
            Some((chunk, (entry, next + 1)))
        });
        Ok(chunks.boxed())
    }

    /// Subscribes to lifecycle events published from now on.
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription::new(self.bus.subscribe())
    }

    /// Records matching `filter`, oldest first.
    pub fn list(&self, filter: &TaskFilter) -> Vec<TaskRecord> {
        self.store.list(filter)
    }

    /// Status of every pool, sorted by name.
    pub fn pools(&self) -> Vec<PoolStatus> {
        self.pools.iter().map(WorkerPool::status).collect()
    }

    /// Resizes a pool. Shrinking never interrupts an in-flight execution.
    ///
    /// # Errors
    /// [`OrchestratorError::UnknownPool`] if no pool is named `pool`.
    pub fn scale(&self, pool: &str, n: usize) -> Result<(), OrchestratorError> {
        let target = self
            .pools
            .iter()
            .find(|p| p.name() == pool)
            .ok_or_else(|| OrchestratorError::UnknownPool {
                name: pool.to_string(),
            })?;
        target.scale(n);
        Ok(())
    }

    /// Drops terminal records older than the retention window; returns how many.
    pub fn purge_expired(&self) -> usize {
        match self.cfg.retention_window() {
            Some(retention) => self.store.purge_expired(Instant::now(), retention),
            None => 0,
        }
    }

    /// Launches every pool and the retention janitor. Idempotent.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(&self) {
        if !self.is_accepting() || self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        for pool in &self.pools {
            pool.start(&self.runtime_token);
        }
        if let Some(retention) = self.cfg.retention_window() {
            let handle = tokio::spawn(janitor(
                Arc::clone(&self.store),
                retention,
                self.runtime_token.clone(),
            ));
            self.background.lock().push(handle);
        }
        tracing::debug!(
            pools = self.pools.len(),
            transport = self.bus.name(),
            "orchestrator started"
        );
    }

    /// Stops accepting submissions and shuts the pools down.
    ///
    /// With `drain = true` outstanding work may finish within `grace`; anything
    /// still outstanding afterwards is cancelled and reported as
    /// [`OrchestratorError::GraceExceeded`]. With `drain = false` everything
    /// outstanding is cancelled right away.
    pub async fn stop(&self, drain: bool) -> Result<(), OrchestratorError> {
        self.accepting.store(false, Ordering::Release);
        let grace = self.cfg.grace;
        tracing::debug!(drain, ?grace, "orchestrator stopping");

        let mut result = Ok(());
        if drain {
            if tokio::time::timeout(grace, self.store.wait_settled())
                .await
                .is_err()
            {
                let stuck = self.stuck();
                tracing::warn!(?grace, stuck = stuck.len(), "drain exceeded grace");
                self.cancel_outstanding("grace exceeded");
                result = Err(OrchestratorError::GraceExceeded { grace, stuck });
            }
        } else {
            self.cancel_outstanding("orchestrator stopped");
        }

        for pool in &self.pools {
            pool.queue().close();
        }
        self.runtime_token.cancel();

        let mut handles: Vec<JoinHandle<()>> =
            self.pools.iter().flat_map(WorkerPool::take_handles).collect();
        handles.append(&mut self.background.lock());
        let joined = tokio::time::timeout(grace, futures::future::join_all(handles)).await;
        if joined.is_err() && result.is_ok() {
            let stuck = self.stuck();
            tracing::warn!(?grace, stuck = stuck.len(), "slots did not stop within grace");
            result = Err(OrchestratorError::GraceExceeded { grace, stuck });
        }
        tracing::debug!(ok = result.is_ok(), "orchestrator stopped");
        result
    }

    /// Starts, waits for a termination signal, then [`Orchestrator::stop`]s.
    pub async fn run_until_signal(&self, drain: bool) -> Result<(), OrchestratorError> {
        self.start();
        match shutdown::wait_for_shutdown_signal().await {
            Ok(signal) => tracing::info!(signal, "shutdown signal received"),
            Err(e) => tracing::warn!(error = %e, "signal handlers unavailable; stopping"),
        }
        self.stop(drain).await
    }

    fn entry(&self, task_id: TaskId) -> Result<Arc<RecordEntry>, OrchestratorError> {
        self.store
            .get(task_id)
            .ok_or(OrchestratorError::NotFound { task_id })
    }

    fn stuck(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self
            .store
            .outstanding()
            .iter()
            .map(|e| e.snapshot().task_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Cancels every task token, closes and clears queues, settles queued
    /// records.
    ///
    /// Queues close before the records are scanned, so a submission racing
    /// with `stop` either shows up in the scan or fails its push.
    fn cancel_outstanding(&self, reason: &str) {
        self.tasks_token.cancel();
        for pool in &self.pools {
            pool.queue().close();
            pool.queue().drain();
        }
        for entry in self.store.outstanding() {
            if let Some(attempts) = entry.cancel_if_queued(reason) {
                let task_id = entry.snapshot().task_id;
                self.bus
                    .publish(Event::cancelled(task_id, attempts, reason));
            }
        }
    }
}

async fn janitor(store: Arc<RecordStore>, retention: Duration, token: CancellationToken) {
    let period = (retention / 4).clamp(Duration::from_millis(100), Duration::from_secs(60));
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tick.tick() => {
                let purged = store.purge_expired(Instant::now(), retention);
                if purged > 0 {
                    tracing::debug!(purged, "expired task records purged");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::core::record::TaskStatus;
    use crate::events::EventKind;
    use crate::tasks::{TaskHandler, TaskMetadata};

    fn orchestrator() -> Arc<Orchestrator> {
        let registry = TaskRegistry::builder()
            .register(
                "echo",
                TaskHandler::single(|payload, _ctx| async move { Ok(payload) }),
                TaskMetadata::new(TaskCategory::Tool),
            )
            .unwrap()
            .build();
        let cfg = OrchestratorConfig {
            throttle: crate::queue::ThrottleConfig::disabled(),
            ..OrchestratorConfig::default()
        };
        Orchestrator::builder(registry).with_config(cfg).build()
    }

    #[tokio::test]
    async fn test_submit_unknown_task() {
        let orch = orchestrator();
        let err = orch
            .submit("nope", json!(null), SubmitOptions::default())
            .unwrap_err();
        assert_eq!(err, OrchestratorError::UnknownTask { name: "nope".into() });
        assert!(orch.list(&TaskFilter::all()).is_empty());
    }

    #[tokio::test]
    async fn test_cancel_queued_task_before_start() {
        let orch = orchestrator();
        let mut events = orch.subscribe();
        let id = orch
            .submit("echo", json!(1), SubmitOptions::default().with_label("batch"))
            .unwrap();
        assert_eq!(orch.pools().iter().map(|p| p.queued).sum::<usize>(), 1);

        orch.cancel(id).unwrap();
        orch.cancel(id).unwrap();
        let record = orch.status(id).unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);
        assert_eq!(record.attempts, 0);
        assert_eq!(orch.pools().iter().map(|p| p.queued).sum::<usize>(), 0);

        assert_eq!(events.recv().await.unwrap().kind, EventKind::Submitted);
        assert_eq!(events.recv().await.unwrap().kind, EventKind::Cancelled);
        assert_eq!(
            orch.list(&TaskFilter::all().with_label("batch")).len(),
            1
        );
    }

    #[tokio::test]
    async fn test_status_of_unknown_id() {
        let orch = orchestrator();
        let id = TaskId::new();
        assert_eq!(
            orch.status(id).unwrap_err(),
            OrchestratorError::NotFound { task_id: id }
        );
        assert!(orch.cancel(id).is_err());
    }

    #[tokio::test]
    async fn test_scale_unknown_pool() {
        let orch = orchestrator();
        assert!(matches!(
            orch.scale("gpu", 2),
            Err(OrchestratorError::UnknownPool { .. })
        ));
        orch.scale("tool", 7).unwrap();
        let tool = orch.pools().into_iter().find(|p| p.name == "tool").unwrap();
        assert_eq!(tool.size, 7);
    }

    #[tokio::test]
    async fn test_submit_after_stop_is_rejected() {
        let orch = orchestrator();
        let queued = orch
            .submit("echo", json!(1), SubmitOptions::default())
            .unwrap();
        orch.stop(false).await.unwrap();
        assert_eq!(orch.status(queued).unwrap().status, TaskStatus::Cancelled);
        assert_eq!(
            orch.submit("echo", json!(2), SubmitOptions::default()),
            Err(OrchestratorError::ShuttingDown)
        );
        assert!(!orch.is_accepting());
    }

    #[tokio::test]
    async fn test_submit_racing_cancel_outstanding_is_not_stranded() {
        let orch = orchestrator();
        let mut events = orch.subscribe();
        let early = orch
            .submit("echo", json!(1), SubmitOptions::default())
            .unwrap();

        // Submission that passed the accepting check just before `stop` ran.
        orch.cancel_outstanding("orchestrator stopped");
        assert!(orch.is_accepting());
        assert_eq!(
            orch.submit("echo", json!(2), SubmitOptions::default()),
            Err(OrchestratorError::ShuttingDown)
        );

        let records = orch.list(&TaskFilter::all());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].task_id, early);
        assert_eq!(records[0].status, TaskStatus::Cancelled);
        assert!(orch.list(&TaskFilter::all().with_status(TaskStatus::Pending)).is_empty());

        let mut kinds = Vec::new();
        for _ in 0..4 {
            kinds.push(events.recv().await.unwrap().kind);
        }
        use EventKind::*;
        assert_eq!(kinds, [Submitted, Cancelled, Submitted, Cancelled]);
    }
}
