//! # Subscriber fan-out.
//!
//! [`SubscriberSet`] hands every lifecycle [`Event`] to each registered
//! [`Subscribe`] implementation through its own bounded queue, so `emit`
//! never waits for a subscriber.
//!
//! - Events reach one subscriber in publication order; there is no ordering
//!   across subscribers.
//! - A full queue drops the *new* event for that subscriber only and bumps
//!   its counter ([`SubscriberSet::dropped`]).
//! - A panicking `on_event` is logged and the worker keeps going.
//!
//! ```text
//!   listener ─► emit(Arc<Event>) ─┬─► [llm-audit queue] ─► worker ─► on_event
//!                                 ├─► [log queue]       ─► worker ─► on_event
//!                                 └─► [metrics queue]   ─► worker ─► on_event
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::events::Event;

use super::Subscribe;

struct SubscriberChannel {
    name: &'static str,
    sender: mpsc::Sender<Arc<Event>>,
    dropped: AtomicU64,
}

/// Composite fan-out with per-subscriber bounded queues and worker tasks.
pub struct SubscriberSet {
    channels: Vec<SubscriberChannel>,
    workers: Vec<JoinHandle<()>>,
}

impl SubscriberSet {
    /// Creates a new set and spawns one worker per subscriber.
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>) -> Self {
        let mut channels = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for sub in subs {
            let cap = sub.queue_capacity().max(1);
            let name = sub.name();
            let (tx, mut rx) = mpsc::channel::<Arc<Event>>(cap);

            let handle = tokio::spawn(async move {
                while let Some(ev) = rx.recv().await {
                    let fut = sub.on_event(ev.as_ref());
                    if let Err(panic) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                        tracing::warn!(
                            subscriber = sub.name(),
                            info = %panic_message(panic.as_ref()),
                            "subscriber panicked"
                        );
                    }
                }
            });

            channels.push(SubscriberChannel {
                name,
                sender: tx,
                dropped: AtomicU64::new(0),
            });
            workers.push(handle);
        }

        Self { channels, workers }
    }

    /// Fans out one event to all subscribers (non-blocking).
    pub fn emit(&self, event: Arc<Event>) {
        for channel in &self.channels {
            let reason = match channel.sender.try_send(Arc::clone(&event)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "full",
                Err(mpsc::error::TrySendError::Closed(_)) => "closed",
            };
            let total = channel.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(
                subscriber = channel.name,
                reason,
                total,
                seq = event.seq,
                "subscriber dropped event"
            );
        }
    }

    /// Per-subscriber overflow counters as `(name, dropped)`.
    pub fn dropped(&self) -> Vec<(&'static str, u64)> {
        self.channels
            .iter()
            .map(|c| (c.name, c.dropped.load(Ordering::Relaxed)))
            .collect()
    }

    /// Graceful shutdown: close all queues and await worker completion.
    pub async fn shutdown(self) {
        drop(self.channels);
        for h in self.workers {
            let _ = h.await;
        }
    }

    /// True if there are no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Number of subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
