//! Configuration structures for the jobrun engine.
//!
//! This module defines configuration options for various components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine settings (pooling, epochs)
//! - [`ExecutionConfig`]: Per-execution settings (memory default, output caps)

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
///
/// This structure contains all configuration options for the engine.
/// It can be loaded from files (TOML, JSON) or assembled programmatically.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-execution configuration.
    #[serde(default)]
    pub execution: ExecutionConfig,
}

/// Wasmtime engine configuration.
///
/// These settings affect the shared Wasmtime engine behavior, including
/// the allocation strategy and the epoch-based preemption used for
/// cancellation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable pooling allocator for high-performance instance creation.
    ///
    /// Disabled by default: compute jobs tend to be long-lived and
    /// memory-heavy, so on-demand allocation is the safer default. Enable
    /// for fleets of many small, short executions.
    #[serde(default = "defaults::pooling_allocator")]
    pub pooling_allocator: bool,

    /// Maximum concurrent instances in the pool.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::max_instances")]
    pub max_instances: u32,

    /// Memory per pooled instance slot in bytes.
    ///
    /// Only effective when `pooling_allocator` is enabled. Must be at
    /// least as large as the largest memory budget a job may request.
    #[serde(default = "defaults::pool_memory_bytes")]
    pub pool_memory_bytes: u64,

    /// Enable epoch-based interruption.
    ///
    /// This is what allows a cancellation request to preempt a running
    /// entry function between epoch ticks. With it disabled, cancellation
    /// is only observed at the entry-call boundary.
    #[serde(default = "defaults::epoch_interruption")]
    pub epoch_interruption: bool,

    /// Period of the epoch ticker in milliseconds.
    ///
    /// Bounds how quickly a running execution observes cancellation.
    #[serde(default = "defaults::epoch_tick_ms")]
    pub epoch_tick_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pooling_allocator: defaults::pooling_allocator(),
            max_instances: defaults::max_instances(),
            pool_memory_bytes: defaults::pool_memory_bytes(),
            epoch_interruption: defaults::epoch_interruption(),
            epoch_tick_ms: defaults::epoch_tick_ms(),
        }
    }
}

/// Per-execution configuration.
///
/// These settings apply to each execution unless the request overrides
/// them (a request's non-zero memory budget always wins).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Default memory budget in bytes for requests that leave theirs at
    /// zero. Zero here as well means "no explicit limit".
    #[serde(default)]
    pub default_memory_bytes: u64,

    /// Maximum captured stdout size in bytes.
    #[serde(default = "defaults::max_output_bytes")]
    pub max_stdout_bytes: usize,

    /// Maximum captured stderr size in bytes.
    #[serde(default = "defaults::max_output_bytes")]
    pub max_stderr_bytes: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_memory_bytes: 0,
            max_stdout_bytes: defaults::max_output_bytes(),
            max_stderr_bytes: defaults::max_output_bytes(),
        }
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn pooling_allocator() -> bool {
        false
    }

    pub const fn max_instances() -> u32 {
        100
    }

    pub const fn pool_memory_bytes() -> u64 {
        256 * 1024 * 1024
    }

    pub const fn epoch_interruption() -> bool {
        true
    }

    pub const fn epoch_tick_ms() -> u64 {
        10
    }

    pub const fn max_output_bytes() -> usize {
        1024 * 1024
    }
}
