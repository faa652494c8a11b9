//! End-to-end scenarios driven through the public `Orchestrator` API.
//!
//! Every test runs on a paused clock so backoff and deferral delays are exact.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;

use taskhive::{
    Event, EventKind, LoadProbe, Orchestrator, OrchestratorConfig, OrchestratorError, Priority,
    Subscribe, SubmitOptions, TaskCategory, TaskError, TaskFilter, TaskHandler, TaskMetadata,
    TaskRegistry, TaskStatus, ThrottleConfig,
};

fn config() -> OrchestratorConfig {
    OrchestratorConfig {
        pool_sizes: HashMap::from([("tool".to_string(), 1)]),
        jitter_fraction: 0.0,
        throttle: ThrottleConfig::disabled(),
        ..OrchestratorConfig::default()
    }
}

fn echo() -> TaskHandler {
    TaskHandler::single(|payload, _ctx| async move { Ok(payload) })
}

/// Forwards every event kind to the test through a channel.
struct Forward(mpsc::UnboundedSender<(EventKind, Value)>);

#[async_trait]
impl Subscribe for Forward {
    async fn on_event(&self, ev: &Event) {
        let _ = self.0.send((ev.kind, ev.payload.clone()));
    }

    fn name(&self) -> &'static str {
        "forward"
    }
}

struct Busy;

impl LoadProbe for Busy {
    fn cpu_percent(&self) -> Option<f32> {
        Some(99.0)
    }
}

#[tokio::test(start_paused = true)]
async fn test_always_failing_task_backs_off_then_fails() {
    let starts = Arc::new(Mutex::new(Vec::<Instant>::new()));
    let seen = Arc::clone(&starts);
    let registry = TaskRegistry::builder()
        .register(
            "flaky",
            TaskHandler::single(move |_payload, _ctx| {
                seen.lock().unwrap().push(Instant::now());
                async move { Err::<Value, _>(TaskError::fail("boom")) }
            }),
            TaskMetadata::new(TaskCategory::Tool).with_max_retries(2),
        )
        .unwrap()
        .build();
    let cfg = OrchestratorConfig {
        default_backoff_base: 2.0,
        default_backoff_cap: 10.0,
        ..config()
    };
    let orch = Orchestrator::builder(registry).with_config(cfg).build();
    let mut events = orch.subscribe();
    orch.start();

    let id = orch.submit("flaky", json!({}), SubmitOptions::default()).unwrap();
    let record = orch.wait(id).await.unwrap();
    assert_eq!(record.status, TaskStatus::Failed);
    assert_eq!(record.attempts, 3);
    assert_eq!(record.error.as_deref(), Some("error: boom"));

    let starts = starts.lock().unwrap().clone();
    assert_eq!(starts.len(), 3);
    let gaps: Vec<Duration> = starts.windows(2).map(|w| w[1] - w[0]).collect();
    assert!(gaps[0] >= Duration::from_secs(2) && gaps[0] < Duration::from_millis(2100));
    assert!(gaps[1] >= Duration::from_secs(4) && gaps[1] < Duration::from_millis(4100));

    let mut kinds = Vec::new();
    while let Some(ev) = events.recv().await {
        kinds.push(ev.kind);
        if ev.kind.is_terminal() {
            assert_eq!(ev.payload["attempts"], json!(3));
            break;
        }
    }
    use EventKind::*;
    assert_eq!(
        kinds,
        [Submitted, Started, Retried, Started, Retried, Started, Failed]
    );
}

#[tokio::test(start_paused = true)]
async fn test_fatal_error_is_not_retried() {
    let registry = TaskRegistry::builder()
        .register(
            "broken",
            TaskHandler::single(|_p, _ctx| async move {
                Err::<Value, _>(TaskError::fatal("bad input"))
            }),
            TaskMetadata::new(TaskCategory::Tool).with_max_retries(5),
        )
        .unwrap()
        .build();
    let orch = Orchestrator::builder(registry).with_config(config()).build();
    orch.start();

    let id = orch.submit("broken", json!(null), SubmitOptions::default()).unwrap();
    let record = orch.wait(id).await.unwrap();
    assert_eq!(record.status, TaskStatus::Failed);
    assert_eq!(record.attempts, 1);
    assert_eq!(record.error.as_deref(), Some("fatal: bad input"));
}

#[tokio::test(start_paused = true)]
async fn test_panicking_handler_is_retried() {
    let calls = Arc::new(Mutex::new(0u32));
    let counter = Arc::clone(&calls);
    let registry = TaskRegistry::builder()
        .register(
            "shaky",
            TaskHandler::single(move |_p, _ctx| {
                let n = {
                    let mut calls = counter.lock().unwrap();
                    *calls += 1;
                    *calls
                };
                async move {
                    if n == 1 {
                        panic!("first call explodes");
                    }
                    Ok(json!(n))
                }
            }),
            TaskMetadata::new(TaskCategory::Tool),
        )
        .unwrap()
        .build();
    let orch = Orchestrator::builder(registry).with_config(config()).build();
    orch.start();

    let id = orch.submit("shaky", json!(null), SubmitOptions::default()).unwrap();
    let record = orch.wait(id).await.unwrap();
    assert_eq!(record.status, TaskStatus::Completed);
    assert_eq!(record.attempts, 2);
    assert_eq!(record.output, Some(json!(2)));
}

#[tokio::test(start_paused = true)]
async fn test_streaming_chunks_reach_subscribers_and_callers() {
    let registry = TaskRegistry::builder()
        .register(
            "spell",
            TaskHandler::streaming(|payload, _ctx| {
                let word = payload.as_str().unwrap_or_default().to_string();
                futures::stream::iter(
                    word.chars()
                        .map(|c| Ok::<_, TaskError>(json!(c.to_string())))
                        .collect::<Vec<_>>(),
                )
            }),
            TaskMetadata::new(TaskCategory::Llm),
        )
        .unwrap()
        .build();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let orch = Orchestrator::builder(registry)
        .with_config(config())
        .with_subscribers(vec![Arc::new(Forward(tx))])
        .build();

    let id = orch.submit("spell", json!("abc"), SubmitOptions::default()).unwrap();
    let chunks = orch.stream(id).unwrap();
    orch.start();

    let collected: Vec<Value> = chunks.collect().await;
    assert_eq!(collected, [json!("a"), json!("b"), json!("c")]);

    let record = orch.wait(id).await.unwrap();
    assert_eq!(record.status, TaskStatus::Completed);
    assert_eq!(record.output, Some(json!("abc")));

    let mut delivered = Vec::new();
    while let Some((kind, payload)) = rx.recv().await {
        if kind == EventKind::Chunk {
            delivered.push(payload["chunk"].clone());
        }
        if kind.is_terminal() {
            break;
        }
    }
    assert_eq!(delivered, [json!("a"), json!("b"), json!("c")]);

    let replay: Vec<Value> = orch.stream(id).unwrap().collect().await;
    assert_eq!(replay.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_stream_failure_after_chunk_is_terminal() {
    let registry = TaskRegistry::builder()
        .register(
            "half",
            TaskHandler::streaming(|_p, _ctx| {
                futures::stream::iter(vec![Ok(json!("partial")), Err(TaskError::fail("cut"))])
            }),
            TaskMetadata::new(TaskCategory::Llm).with_max_retries(3),
        )
        .unwrap()
        .build();
    let orch = Orchestrator::builder(registry).with_config(config()).build();
    orch.start();

    let id = orch.submit("half", json!(null), SubmitOptions::default()).unwrap();
    let record = orch.wait(id).await.unwrap();
    assert_eq!(record.status, TaskStatus::Failed);
    assert_eq!(record.attempts, 1);
    assert_eq!(record.chunks, [json!("partial")]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_running_task_before_checkpoint() {
    let gate = Arc::new(Notify::new());
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let handler_gate = Arc::clone(&gate);
    let registry = TaskRegistry::builder()
        .register(
            "careful",
            TaskHandler::single(move |_p, ctx| {
                let gate = Arc::clone(&handler_gate);
                let started = started_tx.clone();
                async move {
                    let _ = started.send(());
                    gate.notified().await;
                    ctx.checkpoint()?;
                    Ok(json!("too late"))
                }
            }),
            TaskMetadata::new(TaskCategory::Tool),
        )
        .unwrap()
        .build();
    let orch = Orchestrator::builder(registry).with_config(config()).build();
    orch.start();

    let id = orch.submit("careful", json!(null), SubmitOptions::default()).unwrap();
    started_rx.recv().await.unwrap();
    assert_eq!(orch.status(id).unwrap().status, TaskStatus::Running);

    orch.cancel(id).unwrap();
    gate.notify_one();
    let record = orch.wait(id).await.unwrap();
    assert_eq!(record.status, TaskStatus::Cancelled);
    assert_eq!(record.output, None);
}

#[tokio::test(start_paused = true)]
async fn test_critical_overtakes_queued_low_tasks() {
    let order = Arc::new(Mutex::new(Vec::<Value>::new()));
    let seen = Arc::clone(&order);
    let registry = TaskRegistry::builder()
        .register(
            "work",
            TaskHandler::single(move |payload, _ctx| {
                seen.lock().unwrap().push(payload.clone());
                async move { Ok(payload) }
            }),
            TaskMetadata::new(TaskCategory::Tool),
        )
        .unwrap()
        .build();
    let orch = Orchestrator::builder(registry).with_config(config()).build();

    let low = SubmitOptions::default().with_priority(Priority::Low);
    let mut ids = Vec::new();
    for i in 0..100 {
        ids.push(orch.submit("work", json!(i), low.clone()).unwrap());
    }
    let critical = orch
        .submit(
            "work",
            json!("urgent"),
            SubmitOptions::default().with_priority(Priority::Critical),
        )
        .unwrap();
    orch.start();

    orch.wait(critical).await.unwrap();
    for id in ids {
        orch.wait(id).await.unwrap();
    }
    let order = order.lock().unwrap();
    assert_eq!(order.len(), 101);
    assert_eq!(order[0], json!("urgent"));
    assert_eq!(order[1], json!(0));
    assert_eq!(order[100], json!(99));
}

#[tokio::test(start_paused = true)]
async fn test_overload_defers_low_priority_only() {
    let starts = Arc::new(Mutex::new(HashMap::<String, Instant>::new()));
    let seen = Arc::clone(&starts);
    let registry = TaskRegistry::builder()
        .register(
            "work",
            TaskHandler::single(move |payload, _ctx| {
                let key = payload.as_str().unwrap_or_default().to_string();
                seen.lock().unwrap().insert(key, Instant::now());
                async move { Ok(payload) }
            }),
            TaskMetadata::new(TaskCategory::Tool),
        )
        .unwrap()
        .build();
    let cfg = OrchestratorConfig {
        throttle: ThrottleConfig {
            cpu_threshold: 90.0,
            max_in_flight: 0,
            defer: Duration::from_secs(5),
        },
        ..config()
    };
    let orch = Orchestrator::builder(registry)
        .with_config(cfg)
        .with_load_probe(Arc::new(Busy))
        .build();
    let t0 = Instant::now();
    orch.start();

    let low = orch
        .submit("work", json!("low"), SubmitOptions::default().with_priority(Priority::Low))
        .unwrap();
    let high = orch
        .submit("work", json!("high"), SubmitOptions::default().with_priority(Priority::High))
        .unwrap();
    orch.wait(high).await.unwrap();
    orch.wait(low).await.unwrap();

    let starts = starts.lock().unwrap();
    assert!(starts["high"] - t0 < Duration::from_secs(1));
    assert!(starts["low"] - t0 >= Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_expired_deadline_fails_without_running() {
    let registry = TaskRegistry::builder()
        .register("echo", echo(), TaskMetadata::new(TaskCategory::Tool))
        .unwrap()
        .build();
    let orch = Orchestrator::builder(registry).with_config(config()).build();

    let id = orch
        .submit(
            "echo",
            json!(1),
            SubmitOptions::default().with_timeout(Duration::from_secs(1)),
        )
        .unwrap();
    tokio::time::advance(Duration::from_secs(2)).await;
    orch.start();

    let record = orch.wait(id).await.unwrap();
    assert_eq!(record.status, TaskStatus::Failed);
    assert_eq!(record.attempts, 0);
    assert_eq!(record.error.as_deref(), Some("deadline exceeded"));
}

#[tokio::test(start_paused = true)]
async fn test_status_is_idempotent_and_listable() {
    let registry = TaskRegistry::builder()
        .register("echo", echo(), TaskMetadata::new(TaskCategory::Tool))
        .unwrap()
        .build();
    let orch = Orchestrator::builder(registry).with_config(config()).build();
    orch.start();

    let id = orch
        .submit("echo", json!({"k": 1}), SubmitOptions::default().with_label("nightly"))
        .unwrap();
    orch.wait(id).await.unwrap();

    let first = orch.status(id).unwrap();
    let second = orch.status(id).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.output, Some(json!({"k": 1})));

    let done = orch.list(&TaskFilter::all().with_status(TaskStatus::Completed));
    assert_eq!(done.len(), 1);
    assert!(orch.list(&TaskFilter::all().with_label("weekly")).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_administrative_errors() {
    let registry = TaskRegistry::builder()
        .register("echo", echo(), TaskMetadata::new(TaskCategory::Tool))
        .unwrap()
        .build();
    let orch = Orchestrator::builder(registry).with_config(config()).build();

    assert!(matches!(
        orch.submit("missing", json!(null), SubmitOptions::default()),
        Err(OrchestratorError::UnknownTask { .. })
    ));
    assert!(matches!(
        orch.scale("gpu", 1),
        Err(OrchestratorError::UnknownPool { .. })
    ));
    let stranger = taskhive::TaskId::new();
    assert!(matches!(
        orch.status(stranger),
        Err(OrchestratorError::NotFound { .. })
    ));

    orch.stop(true).await.unwrap();
    assert_eq!(
        orch.submit("echo", json!(null), SubmitOptions::default()),
        Err(OrchestratorError::ShuttingDown)
    );
}

#[tokio::test(start_paused = true)]
async fn test_drain_stop_finishes_running_work() {
    let registry = TaskRegistry::builder()
        .register(
            "slow",
            TaskHandler::single(|_p, _ctx| async move {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Ok(json!("finished"))
            }),
            TaskMetadata::new(TaskCategory::Tool),
        )
        .unwrap()
        .build();
    let orch = Orchestrator::builder(registry).with_config(config()).build();
    orch.start();

    let first = orch.submit("slow", json!(null), SubmitOptions::default()).unwrap();
    let second = orch.submit("slow", json!(null), SubmitOptions::default()).unwrap();
    orch.stop(true).await.unwrap();

    for id in [first, second] {
        let record = orch.status(id).unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
    }
}

#[tokio::test(start_paused = true)]
async fn test_immediate_stop_cancels_everything() {
    let registry = TaskRegistry::builder()
        .register(
            "polite",
            TaskHandler::single(|_p, ctx| async move {
                ctx.cancelled().await;
                Err::<Value, _>(TaskError::Canceled)
            }),
            TaskMetadata::new(TaskCategory::Tool),
        )
        .unwrap()
        .build();
    let orch = Orchestrator::builder(registry).with_config(config()).build();
    orch.start();

    let running = orch.submit("polite", json!(null), SubmitOptions::default()).unwrap();
    let queued = orch.submit("polite", json!(null), SubmitOptions::default()).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    orch.stop(false).await.unwrap();
    for id in [running, queued] {
        assert_eq!(orch.status(id).unwrap().status, TaskStatus::Cancelled);
    }
    assert_eq!(orch.status(queued).unwrap().attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_drain_reports_stuck_tasks_after_grace() {
    let registry = TaskRegistry::builder()
        .register(
            "stubborn",
            TaskHandler::single(|_p, _ctx| async move {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok(json!(null))
            }),
            TaskMetadata::new(TaskCategory::Tool),
        )
        .unwrap()
        .build();
    let cfg = OrchestratorConfig {
        grace: Duration::from_secs(1),
        ..config()
    };
    let orch = Orchestrator::builder(registry).with_config(cfg).build();
    orch.start();

    let id = orch.submit("stubborn", json!(null), SubmitOptions::default()).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    match orch.stop(true).await {
        Err(OrchestratorError::GraceExceeded { grace, stuck }) => {
            assert_eq!(grace, Duration::from_secs(1));
            assert_eq!(stuck, [id]);
        }
        other => panic!("expected GraceExceeded, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_terminal_records_expire_after_retention() {
    let registry = TaskRegistry::builder()
        .register("echo", echo(), TaskMetadata::new(TaskCategory::Tool))
        .unwrap()
        .build();
    let cfg = OrchestratorConfig {
        retention: Duration::from_secs(10),
        ..config()
    };
    let orch = Orchestrator::builder(registry).with_config(cfg).build();
    orch.start();

    let id = orch.submit("echo", json!(1), SubmitOptions::default()).unwrap();
    orch.wait(id).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(orch.status(id).is_ok());

    tokio::time::sleep(Duration::from_secs(15)).await;
    assert!(matches!(
        orch.status(id),
        Err(OrchestratorError::NotFound { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_scale_up_runs_tasks_concurrently() {
    let registry = TaskRegistry::builder()
        .register(
            "nap",
            TaskHandler::single(|_p, _ctx| async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(json!(null))
            }),
            TaskMetadata::new(TaskCategory::Tool),
        )
        .unwrap()
        .build();
    let orch = Orchestrator::builder(registry).with_config(config()).build();
    orch.start();
    orch.scale("tool", 4).unwrap();

    let t0 = Instant::now();
    let ids: Vec<_> = (0..4)
        .map(|_| orch.submit("nap", json!(null), SubmitOptions::default()).unwrap())
        .collect();
    for id in ids {
        orch.wait(id).await.unwrap();
    }
    assert!(Instant::now() - t0 < Duration::from_secs(2));
    assert_eq!(orch.pools()[0].size, 4);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_backoff_cap_still_retries() {
    let calls = Arc::new(Mutex::new(0u32));
    let counter = Arc::clone(&calls);
    let registry = TaskRegistry::builder()
        .register(
            "second_time_lucky",
            TaskHandler::single(move |_p, _ctx| {
                let n = {
                    let mut calls = counter.lock().unwrap();
                    *calls += 1;
                    *calls
                };
                async move {
                    if n == 1 {
                        return Err(TaskError::fail("warming up"));
                    }
                    Ok(json!(n))
                }
            }),
            TaskMetadata::new(TaskCategory::Tool),
        )
        .unwrap()
        .build();
    let parsed: OrchestratorConfig =
        serde_json::from_value(json!({"default_backoff_cap": 1e30})).unwrap();
    let cfg = OrchestratorConfig {
        default_backoff_cap: parsed.default_backoff_cap,
        ..config()
    };
    let orch = Orchestrator::builder(registry).with_config(cfg).build();
    orch.start();

    let t0 = Instant::now();
    let id = orch
        .submit("second_time_lucky", json!(null), SubmitOptions::default())
        .unwrap();
    let record = orch.wait(id).await.unwrap();
    assert_eq!(record.status, TaskStatus::Completed);
    assert_eq!(record.attempts, 2);
    assert!(Instant::now() - t0 >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_retry_past_deadline_fails_without_retrying() {
    let registry = TaskRegistry::builder()
        .register(
            "flaky",
            TaskHandler::single(|_p, _ctx| async move {
                Err::<Value, _>(TaskError::fail("boom"))
            }),
            TaskMetadata::new(TaskCategory::Tool)
                .with_max_retries(3)
                .with_estimated_duration(Duration::from_secs(5)),
        )
        .unwrap()
        .build();
    let orch = Orchestrator::builder(registry).with_config(config()).build();
    let mut events = orch.subscribe();
    orch.start();

    let id = orch
        .submit(
            "flaky",
            json!(null),
            SubmitOptions::default().with_timeout(Duration::from_secs(4)),
        )
        .unwrap();
    let record = orch.wait(id).await.unwrap();
    assert_eq!(record.status, TaskStatus::Failed);
    assert_eq!(record.attempts, 1);
    assert_eq!(record.error.as_deref(), Some("deadline exceeded"));

    let mut kinds = Vec::new();
    while let Some(ev) = events.recv().await {
        kinds.push(ev.kind);
        if ev.kind.is_terminal() {
            break;
        }
    }
    use EventKind::*;
    assert_eq!(kinds, [Submitted, Started, Failed]);
}

async fn assert_in_process_delivery(orch: Arc<Orchestrator>) {
    let mut events = orch.subscribe();
    orch.start();

    let id = orch.submit("echo", json!("hi"), SubmitOptions::default()).unwrap();
    let record = orch.wait(id).await.unwrap();
    assert_eq!(record.status, TaskStatus::Completed);
    assert_eq!(record.output, Some(json!("hi")));

    let mut kinds = Vec::new();
    while let Some(ev) = events.recv().await {
        kinds.push(ev.kind);
        if ev.kind.is_terminal() {
            break;
        }
    }
    use EventKind::*;
    assert_eq!(kinds, [Submitted, Started, Completed]);
    orch.stop(true).await.unwrap();
}

fn unreachable_transport() -> Arc<Orchestrator> {
    let registry = TaskRegistry::builder()
        .register("echo", echo(), TaskMetadata::new(TaskCategory::Tool))
        .unwrap()
        .build();
    let cfg = OrchestratorConfig {
        broadcast_transport: Some("nats://127.0.0.1:1".to_string()),
        ..config()
    };
    Orchestrator::builder(registry).with_config(cfg).build()
}

#[cfg(not(feature = "nats"))]
#[tokio::test(start_paused = true)]
async fn test_transport_without_feature_falls_back_to_bus() {
    let orch = unreachable_transport();
    assert_eq!(orch.broadcaster_name(), "in-process");
    assert_in_process_delivery(orch).await;
}

#[cfg(feature = "nats")]
#[tokio::test]
async fn test_unreachable_transport_keeps_local_delivery() {
    let orch = unreachable_transport();
    assert_eq!(orch.broadcaster_name(), "nats");
    assert_in_process_delivery(orch).await;
}
