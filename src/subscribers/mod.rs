//! # Event subscribers.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out
//! and the built-in [`LogWriter`] (feature `logging`).
//!
//! ## Architecture
//! ```text
//!   slot / orchestrator ── publish(Event) ──► Broadcaster ──► subscriber listener
//!                                                                   │
//!                                                          SubscriberSet::emit
//!                                                         ┌─────────┼─────────┐
//!                                                         ▼         ▼         ▼
//!                                                     LogWriter   Metrics   Custom
//! ```
//!
//! The subscriber list is fixed when the orchestrator is built.

mod embedded;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
pub(crate) use set::panic_message;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
