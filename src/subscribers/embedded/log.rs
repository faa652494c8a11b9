//! # LogWriter: lifecycle events through `tracing`
//!
//! A minimal subscriber that renders incoming [`Event`]s as `tracing` records
//! under the `taskhive::events` target. Terminal failures log at `warn`,
//! chunks at `trace`, everything else at `info`.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO  taskhive::events: submitted task_id=… name="summarize" priority="HIGH"
//! INFO  taskhive::events: started task_id=… attempt=1
//! INFO  taskhive::events: retried task_id=… attempt=1 delay_ms=2000 error="error: timeout"
//! WARN  taskhive::events: failed task_id=… attempts=3 reason="task_failed"
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let p = &e.payload;
        match e.kind {
            EventKind::Submitted => tracing::info!(
                target: "taskhive::events",
                task_id = %e.task_id,
                name = %p["name"],
                priority = %p["priority"],
                "submitted"
            ),
            EventKind::Started => tracing::info!(
                target: "taskhive::events",
                task_id = %e.task_id,
                attempt = %p["attempt"],
                "started"
            ),
            EventKind::Chunk => tracing::trace!(
                target: "taskhive::events",
                task_id = %e.task_id,
                index = %p["index"],
                "chunk"
            ),
            EventKind::Retried => tracing::info!(
                target: "taskhive::events",
                task_id = %e.task_id,
                attempt = %p["attempt"],
                delay_ms = %p["delay_ms"],
                error = %p["error"],
                "retried"
            ),
            EventKind::Completed => tracing::info!(
                target: "taskhive::events",
                task_id = %e.task_id,
                attempts = %p["attempts"],
                "completed"
            ),
            EventKind::Failed => tracing::warn!(
                target: "taskhive::events",
                task_id = %e.task_id,
                attempts = %p["attempts"],
                reason = %p["reason"],
                error = %p["error"],
                "failed"
            ),
            EventKind::Cancelled => tracing::info!(
                target: "taskhive::events",
                task_id = %e.task_id,
                reason = %p["reason"],
                "cancelled"
            ),
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
