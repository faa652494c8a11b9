//! Retry policies.
//!
//! This module groups the knobs that control **whether** a failed task is
//! retried and **how long** to wait before the next attempt.
//!
//! ## Contents
//! - [`RetryPolicy`]   retry budget (max retries) plus backoff
//! - [`BackoffPolicy`] how retry delays evolve (base^retries, capped, floored + jitter)
//! - [`JitterPolicy`]  randomization strategy to avoid synchronized retry storms
//!
//! ## Quick wiring
//! ```text
//! SubmitOptions / TaskMetadata / OrchestratorConfig
//!      └─► ScheduledTask { retries, retry: RetryPolicy, .. }
//!           └─► core::slot uses:
//!                - retry.allows(retries) to decide retry vs FAILED
//!                - envelope.next_retry_delay() to schedule the successor
//! ```
//!
//! ## Defaults
//! - `RetryPolicy::default()` → 3 retries.
//! - `BackoffPolicy::default()` → base=2.0, cap=30s, min_delay=50ms, jitter=±10%.

mod backoff;
mod jitter;
mod retry;

pub use backoff::{BackoffPolicy, MAX_RETRY_DELAY};
pub use jitter::JitterPolicy;
pub use retry::RetryPolicy;
