//! Engine registry.
//!
//! The registry is the single point where an engine name resolves to an
//! [`Executor`]. Orchestration code asks the registry and dispatches
//! through the trait; it never matches on engine identity itself.

use std::sync::Arc;

use dashmap::DashMap;

use jobrun_common::ExecutorError;

use crate::Executor;

/// A registry of execution engines keyed by name.
///
/// Safe for concurrent registration and lookup; lookups are lock-free
/// reads in the common case.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: DashMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor under its own name.
    ///
    /// A later registration under the same name replaces the earlier one.
    pub fn register(&self, executor: Arc<dyn Executor>) {
        self.executors.insert(executor.name().to_string(), executor);
    }

    /// Look up the executor for an engine name.
    ///
    /// # Errors
    ///
    /// Returns `EngineNotFound` if nothing is registered under `name`.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Executor>, ExecutorError> {
        self.executors
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ExecutorError::EngineNotFound {
                name: name.to_string(),
            })
    }

    /// Names of all registered engines.
    pub fn names(&self) -> Vec<String> {
        self.executors.iter().map(|e| e.key().clone()).collect()
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("engines", &self.names())
            .finish()
    }
}
