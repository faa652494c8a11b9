//! # External broadcaster (NATS mirror).
//!
//! [`ExternalBroadcaster`] keeps the in-process [`Bus`] as the primary fan-out
//! and mirrors every event, best effort, to `{subject}.{event_type}` on a NATS
//! server.
//!
//! ```text
//! publish(ev) ──► Bus (in-process receivers)
//!            └──► try_send ──► [bounded mirror queue] ──► forwarder task ──► NATS
//!                    │                                        │
//!                    └─ full/closed: drop                     └─ publish error: warn, drop
//! ```
//!
//! The forwarder connects lazily with backoff; while disconnected the mirror
//! queue fills and further events are dropped. After the last connect attempt
//! fails the forwarder exits and the broadcaster degrades to in-process only.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{broadcast, mpsc};

use super::broadcaster::Broadcaster;
use super::bus::Bus;
use super::event::Event;
use crate::policies::BackoffPolicy;

const CONNECT_ATTEMPTS: u32 = 5;

/// In-process fan-out plus a best-effort NATS mirror.
pub struct ExternalBroadcaster {
    local: Bus,
    mirror: mpsc::Sender<Arc<Event>>,
    dropped: AtomicU64,
}

impl ExternalBroadcaster {
    /// Wraps `local` and spawns the mirror forwarder.
    ///
    /// Must be called inside a Tokio runtime. `capacity` bounds the mirror queue.
    pub fn connect(
        local: Bus,
        address: impl Into<String>,
        subject: impl Into<String>,
        capacity: usize,
        backoff: BackoffPolicy,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(forward(address.into(), subject.into(), rx, backoff));
        Self {
            local,
            mirror: tx,
            dropped: AtomicU64::new(0),
        }
    }

    /// Events the mirror dropped (queue full or transport gone).
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Broadcaster for ExternalBroadcaster {
    fn publish(&self, event: Event) {
        let ev = Arc::new(event);
        if self.mirror.try_send(Arc::clone(&ev)).is_err() {
            let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if n.is_power_of_two() {
                tracing::warn!(dropped = n, "external broadcast mirror dropping events");
            }
        }
        self.local.publish_arc(ev);
    }

    fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.local.subscribe()
    }

    fn name(&self) -> &'static str {
        "nats"
    }
}

async fn forward(
    address: String,
    subject: String,
    mut rx: mpsc::Receiver<Arc<Event>>,
    backoff: BackoffPolicy,
) {
    let mut attempt = 0;
    let client = loop {
        attempt += 1;
        match async_nats::connect(address.as_str()).await {
            Ok(client) => break client,
            Err(e) if attempt < CONNECT_ATTEMPTS => {
                let delay = backoff.next(attempt);
                tracing::warn!(
                    %address,
                    attempt,
                    ?delay,
                    error = %e,
                    "nats connect failed; retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                tracing::warn!(%address, error = %e, "nats unavailable; mirror disabled");
                return;
            }
        }
    };
    tracing::debug!(%address, %subject, "nats mirror connected");

    while let Some(ev) = rx.recv().await {
        let bytes = match serde_json::to_vec(ev.as_ref()) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "event serialization failed");
                continue;
            }
        };
        let topic = format!("{subject}.{}", ev.kind.as_str());
        if let Err(e) = client.publish(topic, bytes.into()).await {
            tracing::warn!(error = %e, "nats publish failed; event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::policies::JitterPolicy;
    use crate::tasks::TaskId;

    #[tokio::test]
    async fn test_local_fan_out_without_transport() {
        let backoff = BackoffPolicy {
            base: 1.0,
            cap: Duration::from_millis(10),
            min_delay: Duration::from_millis(10),
            jitter: JitterPolicy::None,
        };
        let broadcaster =
            ExternalBroadcaster::connect(Bus::new(8), "127.0.0.1:1", "taskhive", 1, backoff);
        let mut rx = broadcaster.subscribe();
        let id = TaskId::new();
        for i in 0..3 {
            broadcaster.publish(Event::chunk(id, i, json!(i)));
        }
        for i in 0..3 {
            assert_eq!(rx.recv().await.unwrap().payload["index"], json!(i));
        }
        assert_eq!(broadcaster.name(), "nats");
    }
}
