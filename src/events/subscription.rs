//! # Event subscription handle.
//!
//! [`EventSubscription`] wraps a broadcast receiver and hides lag: when the
//! receiver falls behind, skipped events are counted, logged and passed over.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};

use super::event::Event;

/// Receiver of lifecycle events returned by [`Orchestrator::subscribe`](crate::Orchestrator::subscribe).
pub struct EventSubscription {
    rx: broadcast::Receiver<Arc<Event>>,
    dropped: u64,
}

impl EventSubscription {
    pub(crate) fn new(rx: broadcast::Receiver<Arc<Event>>) -> Self {
        Self { rx, dropped: 0 }
    }

    /// Next event; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        loop {
            match self.rx.recv().await {
                Ok(ev) => return Some(ev),
                Err(RecvError::Lagged(n)) => {
                    self.dropped = self.dropped.saturating_add(n);
                    tracing::warn!(skipped = n, total = self.dropped, "event subscription lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Events skipped so far because this subscription lagged.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Converts the subscription into a stream of events.
    pub fn into_stream(self) -> BoxStream<'static, Arc<Event>> {
        stream::unfold(self, |mut sub| async move {
            let ev = sub.recv().await?;
            Some((ev, sub))
        })
        .boxed()
    }
}
