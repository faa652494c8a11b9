//! Lifecycle events: types, bus and broadcasters.
//!
//! ## Contents
//! - [`EventKind`], [`Event`]      event classification and payload
//! - [`Broadcaster`]               publish/subscribe seam used by all producers
//! - [`Bus`] / [`InProcessBroadcaster`] thin wrapper over `tokio::sync::broadcast`
//! - [`EventSubscription`]         lag-tolerant receiver handed to callers
//! - `ExternalBroadcaster`         NATS mirror (feature `nats`)
//!
//! ## Quick reference
//! - **Publishers**: `Orchestrator::submit` / `cancel` / `stop`, worker slots.
//! - **Consumers**: the subscriber listener (fans out to `SubscriberSet`),
//!   `Orchestrator::subscribe`, the external mirror.

mod broadcaster;
mod bus;
mod event;
#[cfg(feature = "nats")]
mod external;
mod subscription;

pub use broadcaster::Broadcaster;
pub use bus::{Bus, InProcessBroadcaster};
pub use event::{Event, EventKind};
#[cfg(feature = "nats")]
pub use external::ExternalBroadcaster;
pub use subscription::EventSubscription;
