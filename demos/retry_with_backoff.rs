//! # Demo: retry_with_backoff
//!
//! A handler fails twice before succeeding. The orchestrator retries it with
//! exponential backoff (`base^retries` seconds, capped, ±jitter).
//!
//! ## Flow
//! ```text
//! submit("flaky") ──► PENDING
//!   ├─► attempt 1 ─► Err(Fail) ─► RETRY_SCHEDULED, retried{delay≈0.5s}
//!   ├─► attempt 2 ─► Err(Fail) ─► RETRY_SCHEDULED, retried{delay≈1s}
//!   └─► attempt 3 ─► Ok        ─► COMPLETED
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example retry_with_backoff
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use serde_json::json;
use taskhive::{
    Event, EventKind, Orchestrator, OrchestratorConfig, Subscribe, SubmitOptions, TaskCategory,
    TaskError, TaskHandler, TaskMetadata, TaskRegistry,
};

static CALLS: AtomicU32 = AtomicU32::new(0);

/// Prints retries and the terminal event.
struct Console;

#[async_trait::async_trait]
impl Subscribe for Console {
    async fn on_event(&self, ev: &Event) {
        match ev.kind {
            EventKind::Retried => println!(
                "[sub] retried: attempt={} delay_ms={} error={}",
                ev.payload["attempt"], ev.payload["delay_ms"], ev.payload["error"]
            ),
            kind if kind.is_terminal() => println!("[sub] {}: {}", kind.as_str(), ev.payload),
            _ => {}
        }
    }

    fn name(&self) -> &'static str {
        "console"
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let registry = TaskRegistry::builder()
        .register(
            "flaky",
            TaskHandler::single(|_payload, ctx| async move {
                let call = CALLS.fetch_add(1, Ordering::Relaxed) + 1;
                println!("[flaky] attempt {}", ctx.attempt());
                if call <= 2 {
                    return Err(TaskError::fail(format!("boom #{call}")));
                }
                Ok(json!({ "succeeded_on": call }))
            }),
            TaskMetadata::new(TaskCategory::Tool).with_max_retries(3),
        )?
        .build();

    let cfg = OrchestratorConfig {
        default_backoff_base: 2.0,
        default_backoff_cap: 5.0,
        ..OrchestratorConfig::default()
    };
    let orch = Orchestrator::builder(registry)
        .with_config(cfg)
        .with_subscribers(vec![Arc::new(Console)])
        .build();
    orch.start();

    let id = orch.submit("flaky", json!(null), SubmitOptions::default())?;
    let record = orch.wait(id).await?;
    println!("[main] {:?} after {} attempts", record.status, record.attempts);

    orch.stop(true).await?;
    Ok(())
}
