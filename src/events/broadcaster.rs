//! # Broadcaster seam.
//!
//! Producers only see `Arc<dyn Broadcaster>`. Two implementations exist:
//! - [`InProcessBroadcaster`](crate::InProcessBroadcaster) (the [`Bus`](crate::Bus));
//! - `ExternalBroadcaster` (feature `nats`): in-process fan-out plus a
//!   best-effort mirror to an external subject.
//!
//! Custom implementations can be injected with
//! [`OrchestratorBuilder::with_broadcaster`](crate::OrchestratorBuilder::with_broadcaster).

use std::sync::Arc;

use tokio::sync::broadcast;

use super::event::Event;

/// Publish/subscribe transport for lifecycle events.
///
/// `publish` must never block or fail the caller; delivery is at-most-once.
pub trait Broadcaster: Send + Sync + 'static {
    /// Publishes an event to every current receiver.
    fn publish(&self, event: Event);

    /// Creates an in-process receiver for events published after this call.
    fn subscribe(&self) -> broadcast::Receiver<Arc<Event>>;

    /// Short transport name for logs.
    fn name(&self) -> &'static str;
}
