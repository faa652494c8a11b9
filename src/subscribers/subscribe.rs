//! # Event observers.
//!
//! Implement [`Subscribe`] to react to task lifecycle events (audit trails,
//! metrics, notifications). Subscribers are handed to
//! [`OrchestratorBuilder::with_subscribers`](crate::OrchestratorBuilder::with_subscribers);
//! each one runs on its own worker behind a bounded queue.
//!
//! ## Contract
//! - Implementations may be slow (I/O, batching): they do **not** block
//!   publishers nor other subscribers.
//! - Each subscriber declares its queue capacity via [`Subscribe::queue_capacity`].
//!   On overflow the **new** event is dropped for that subscriber and counted.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use taskhive::{Event, EventKind, Subscribe};
//!
//! struct Audit;
//!
//! #[async_trait]
//! impl Subscribe for Audit {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind == EventKind::Failed {
//!             // write audit record...
//!         }
//!     }
//!     fn name(&self) -> &'static str { "audit" }
//!     fn queue_capacity(&self) -> usize { 512 }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Observer of lifecycle events.
///
/// `on_event` runs on the subscriber's own worker; long blocking work belongs
/// in `spawn_blocking`.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles a single event.
    async fn on_event(&self, event: &Event);

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Bound of this subscriber's queue (at least 1 is used).
    fn queue_capacity(&self) -> usize {
        1024
    }
}
