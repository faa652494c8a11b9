//! Runtime core: records, pools and the orchestrator.
//!
//! The public API of this module is [`Orchestrator`] (built through
//! [`OrchestratorBuilder`]) and the value types it hands out.
//!
//! Internal modules:
//! - [`store`]: task records with change notification;
//! - [`slot`]: executes one envelope per iteration (retry, streaming, cancellation);
//! - [`pool`]: named slot sets bound to one queue partition, resizable at runtime;
//! - [`shutdown`]: cross-platform termination signals.

mod builder;
pub(crate) mod config;
mod orchestrator;
mod pool;
mod record;
mod shutdown;
mod slot;
mod store;

pub use builder::OrchestratorBuilder;
pub use config::{OrchestratorConfig, PoolSpec};
pub use orchestrator::{Orchestrator, SubmitOptions};
pub use pool::PoolStatus;
pub use record::{TaskFilter, TaskRecord, TaskStatus};
