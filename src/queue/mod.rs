//! Priority queue partitions and admission throttling.
//!
//! ## Contents
//! - [`PriorityTaskQueue`] time-aware priority queue of [`ScheduledTask`](crate::ScheduledTask)s
//! - [`QueueError`]        why a pop ended without an envelope
//! - [`Admission`]         load-aware deferral applied on submit
//! - [`LoadProbe`]         source of CPU samples ([`SystemLoadProbe`] by default)
//! - [`ThrottleConfig`]    thresholds and defer interval
//!
//! ## Flow
//! ```text
//! submit ──► Admission::admit(env, in_flight)
//!              ├─ Critical/High            ─► env unchanged
//!              └─ Normal/Low, overloaded   ─► env.defer_until(now + defer)
//!         ──► PriorityTaskQueue::push(env)
//!               ├─ scheduled_at <= now ─► ready heap   (priority, scheduled_at, sequence)
//!               └─ scheduled_at >  now ─► delayed heap (scheduled_at)
//! slot  ──► pop_ready(stop) ─► promote matured delayed ─► best ready envelope
//! ```

mod admission;
mod priority;

pub use admission::{Admission, LoadProbe, LoadSample, SystemLoadProbe, ThrottleConfig};
pub use priority::{PriorityTaskQueue, QueueError};
