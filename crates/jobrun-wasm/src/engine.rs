//! Wasmtime engine configuration and the shared compiled-module cache.
//!
//! The [`WasmEngine`] is the foundation of the executor. It is:
//! - Thread-safe and shared across all executions
//! - Configured for async execution so entry calls can be suspended
//! - Set up with epoch interruption so cancellation can preempt a
//!   running module between epoch ticks
//!
//! The [`ModuleCache`] is the explicitly owned replacement for a
//! process-wide compilation cache: it is created once, injected into
//! every [`ModuleLoader`](crate::ModuleLoader), and shared by reference.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};
use wasmtime::{Config, Engine, InstanceAllocationStrategy, Module, PoolingAllocationConfig};

use jobrun_common::{EngineConfig, ExecutorError};

/// Thread-safe WebAssembly engine wrapper.
///
/// Wraps a Wasmtime [`Engine`] configured for sandboxed job execution.
/// The engine is shared across all executions and contains no
/// per-execution state; per-execution limits are applied at the store
/// level.
#[derive(Clone)]
pub struct WasmEngine {
    engine: Arc<Engine>,
    config: EngineConfig,
}

impl WasmEngine {
    /// Create a new WebAssembly engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the Wasmtime configuration is invalid or the
    /// pooling allocator cannot be initialized.
    pub fn new(config: &EngineConfig) -> Result<Self, ExecutorError> {
        let mut wasmtime_config = Config::new();

        // Async support lets the entry call suspend at yield points,
        // which is what makes cancellation observable mid-run.
        wasmtime_config.async_support(true);

        if config.epoch_interruption {
            wasmtime_config.epoch_interruption(true);
        }

        wasmtime_config.cranelift_opt_level(wasmtime::OptLevel::Speed);

        if config.pooling_allocator {
            let pooling_config = Self::create_pooling_config(config);

            wasmtime_config
                .allocation_strategy(InstanceAllocationStrategy::Pooling(pooling_config));

            info!(
                max_instances = config.max_instances,
                pool_memory_bytes = config.pool_memory_bytes,
                "Pooling allocator enabled"
            );
        }

        let engine = Engine::new(&wasmtime_config).map_err(|e| {
            ExecutorError::internal(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        info!("Wasmtime engine initialized");

        Ok(Self {
            engine: Arc::new(engine),
            config: config.clone(),
        })
    }

    /// Create pooling allocation configuration.
    fn create_pooling_config(config: &EngineConfig) -> PoolingAllocationConfig {
        let mut pooling = PoolingAllocationConfig::default();

        // Total number of core module instances
        pooling.total_core_instances(config.max_instances);

        // Total number of memories across all instances
        pooling.total_memories(config.max_instances);

        // Total number of tables across all instances
        pooling.total_tables(config.max_instances);

        // Maximum size of a single memory in bytes
        let max_memory_bytes = usize::try_from(config.pool_memory_bytes).unwrap_or(usize::MAX);
        pooling.max_memory_size(max_memory_bytes);

        pooling
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Increment the epoch counter.
    ///
    /// Called periodically by the executor's ticker so that running
    /// executions reach a yield point between ticks.
    pub fn increment_epoch(&self) {
        self.engine.increment_epoch();
    }

    /// Check if the pooling allocator is enabled.
    pub fn is_pooling_enabled(&self) -> bool {
        self.config.pooling_allocator
    }
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("pooling_allocator", &self.config.pooling_allocator)
            .field("epoch_interruption", &self.config.epoch_interruption)
            .finish_non_exhaustive()
    }
}

/// Shared cache of compiled modules, keyed by content hash.
///
/// Compiled [`Module`]s are immutable, shareable values once produced, so
/// the cache is read-mostly and safe for concurrent lookup; concurrent
/// executions of the same module bytes compile once and share the result.
#[derive(Default)]
pub struct ModuleCache {
    modules: DashMap<String, Module>,
}

impl ModuleCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a compiled module by content hash.
    pub fn get(&self, content_hash: &str) -> Option<Module> {
        let module = self
            .modules
            .get(content_hash)
            .map(|entry| entry.value().clone());
        if module.is_some() {
            debug!(content_hash, "Module cache hit");
        }
        module
    }

    /// Insert a compiled module under its content hash.
    pub fn insert(&self, content_hash: String, module: Module) {
        self.modules.insert(content_hash, module);
    }

    /// Number of cached modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl std::fmt::Debug for ModuleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCache")
            .field("len", &self.len())
            .finish()
    }
}
