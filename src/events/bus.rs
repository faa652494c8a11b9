//! # In-process event bus.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] that provides
//! non-blocking event publishing from many sources (orchestrator, slots).
//! It is the [`InProcessBroadcaster`].
//!
//! ## Architecture
//! ```text
//! Publishers (many):                 Receivers (many):
//!   submit   ──┐                  ┌──► subscriber listener ──► SubscriberSet
//!   slot 1   ──┼──► Bus ──────────┼──► EventSubscription (Orchestrator::subscribe)
//!   slot N   ──┘ (broadcast chan) └──► external mirror (ExternalBroadcaster)
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks; it calls `broadcast::Sender::send`.
//! - **Bounded capacity**: a single ring buffer stores recent events for all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: events are lost if there are no active receivers at send time.

use std::sync::Arc;

use tokio::sync::broadcast;

use super::broadcaster::Broadcaster;
use super::event::Event;

/// Broadcast channel for lifecycle events.
///
/// ### Properties
/// - **Non-blocking**: `publish()` returns immediately.
/// - **Fire-and-forget**: no delivery or durability guarantees.
/// - **Cloneable**: cheap to clone (internally holds an `Arc`-backed sender).
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Arc<Event>>,
}

/// The in-process [`Broadcaster`].
pub type InProcessBroadcaster = Bus;

impl Bus {
    /// Creates a new bus with the given channel capacity (clamped to at least 1).
    ///
    /// Capacity is **shared** across all receivers (not per-subscriber).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel::<Arc<Event>>(capacity);
        Self { tx }
    }

    /// Publishes an event to all active receivers.
    ///
    /// If there are no receivers, the event is dropped.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(Arc::new(ev));
    }

    /// Publishes an already shared event.
    pub(crate) fn publish_arc(&self, ev: Arc<Event>) {
        let _ = self.tx.send(ev);
    }

    /// Creates a new receiver that observes events sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Broadcaster for Bus {
    fn publish(&self, event: Event) {
        Bus::publish(self, event);
    }

    fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        Bus::subscribe(self)
    }

    fn name(&self) -> &'static str {
        "in-process"
    }
}
