//! # Demo: streaming
//!
//! A streaming handler yields words one by one. The caller follows the chunk
//! stream while a second consumer watches the event bus.
//!
//! ## Run
//! ```bash
//! cargo run --example streaming
//! ```

use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use taskhive::{
    Orchestrator, Priority, SubmitOptions, TaskCategory, TaskError, TaskHandler,
    TaskMetadata, TaskRegistry,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let registry = TaskRegistry::builder()
        .register(
            "words",
            TaskHandler::streaming(|payload, ctx| {
                let text = payload.as_str().unwrap_or_default().to_string();
                let words: Vec<String> = text.split(' ').map(|w| format!("{w} ")).collect();
                futures::stream::iter(words).then(move |word| {
                    let ctx = ctx.clone();
                    async move {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        ctx.checkpoint()?;
                        Ok::<_, TaskError>(json!(word))
                    }
                })
            }),
            TaskMetadata::new(TaskCategory::Llm).with_priority(Priority::High),
        )?
        .build();

    let orch = Orchestrator::builder(registry).build();
    let mut events = orch.subscribe();
    orch.start();

    let id = orch.submit(
        "words",
        json!("streams are lazy and forward only"),
        SubmitOptions::default().with_label("demo"),
    )?;

    let watcher = tokio::spawn(async move {
        while let Some(ev) = events.recv().await {
            if ev.task_id != id {
                continue;
            }
            println!("[bus] seq={} {}", ev.seq, ev.kind.as_str());
            if ev.kind.is_terminal() {
                break;
            }
        }
    });

    let mut chunks = orch.stream(id)?;
    while let Some(chunk) = chunks.next().await {
        println!("[caller] chunk {chunk}");
    }

    let record = orch.wait(id).await?;
    println!("[main] output = {}", record.output.unwrap_or_default());
    let _ = watcher.await;

    orch.stop(true).await?;
    Ok(())
}
