//! # Task registry: immutable name → handler table.
//!
//! The registry is assembled once with [`TaskRegistry::builder`] and frozen by
//! [`RegistryBuilder::build`]. After that it is shared read-only (`Arc`) between
//! the orchestrator and every worker slot, so resolving a name takes no lock.
//!
//! ## Rules
//! - Names are unique: [`RegistryBuilder::register`] fails with `DuplicateName`.
//! - Overwriting is only possible through the explicit [`RegistryBuilder::replace`].
//! - [`TaskRegistry::resolve`] fails with `UnknownTask` for unbound names.
//!
//! ## Example
//! ```rust
//! use taskhive::{TaskCategory, TaskHandler, TaskMetadata, TaskRegistry};
//!
//! # fn main() -> Result<(), taskhive::OrchestratorError> {
//! let registry = TaskRegistry::builder()
//!     .register(
//!         "echo",
//!         TaskHandler::single(|payload, _ctx| async move { Ok(payload) }),
//!         TaskMetadata::new(TaskCategory::Tool),
//!     )?
//!     .build();
//!
//! assert!(registry.resolve("echo").is_ok());
//! assert!(registry.resolve("missing").is_err());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;

use crate::error::OrchestratorError;
use crate::tasks::{TaskCategory, TaskHandler, TaskMetadata};

/// Handler plus its static metadata.
#[derive(Clone, Debug)]
pub struct RegisteredTask {
    /// The handler to invoke.
    pub handler: TaskHandler,
    /// Static descriptor.
    pub metadata: TaskMetadata,
}

/// Immutable registry of task handlers.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    entries: HashMap<String, RegisteredTask>,
}

impl TaskRegistry {
    /// Starts an empty registration table.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Resolves a name to its handler and metadata.
    pub fn resolve(&self, name: &str) -> Result<&RegisteredTask, OrchestratorError> {
        self.entries
            .get(name)
            .ok_or_else(|| OrchestratorError::UnknownTask {
                name: name.to_string(),
            })
    }

    /// Returns `true` if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Returns sorted registered names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Categories used by at least one handler.
    pub fn categories(&self) -> Vec<TaskCategory> {
        let mut cats: Vec<TaskCategory> = self
            .entries
            .values()
            .map(|e| e.metadata.category)
            .collect();
        cats.sort_unstable();
        cats.dedup();
        cats
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Mutable registration table, consumed by [`RegistryBuilder::build`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entries: HashMap<String, RegisteredTask>,
}

impl RegistryBuilder {
    /// Binds `name` to a handler; fails if the name is taken.
    pub fn register(
        mut self,
        name: impl Into<String>,
        handler: TaskHandler,
        metadata: TaskMetadata,
    ) -> Result<Self, OrchestratorError> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(OrchestratorError::DuplicateName { name });
        }
        self.entries
            .insert(name, RegisteredTask { handler, metadata });
        Ok(self)
    }

    /// Binds `name` to a handler, replacing any previous binding (last wins).
    pub fn replace(
        mut self,
        name: impl Into<String>,
        handler: TaskHandler,
        metadata: TaskMetadata,
    ) -> Self {
        self.entries
            .insert(name.into(), RegisteredTask { handler, metadata });
        self
    }

    /// Freezes the table.
    pub fn build(self) -> TaskRegistry {
        TaskRegistry {
            entries: self.entries,
        }
    }
}
