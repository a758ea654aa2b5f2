//! Sandboxed WebAssembly execution engine for jobrun.
//!
//! This crate takes a validated execution request naming an entry module
//! and zero or more import modules, loads and links them against a
//! resource-limited virtual machine, runs the entrypoint to completion
//! or failure, and returns a structured outcome:
//!
//! - [`WasmEngine`] / [`ModuleCache`]: shared Wasmtime engine and the
//!   injected compiled-module cache
//! - [`limits`]: memory-budget → page-limit translation
//! - [`CompiledModule`]: compiled module with extracted signatures
//! - [`validate`]: import-satisfaction and entrypoint-shape checks
//! - [`ModuleLoader`] / [`LinkedInstance`]: compilation and
//!   imports-first linking
//! - [`ExecutionHandler`] / [`ExecutionMonitor`]: the per-execution
//!   state machine and its concurrent observer
//! - [`WasmExecutor`]: the engine's capability-interface implementation
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              WasmEngine + ModuleCache                   │
//! │  (Shared across all executions, thread-safe)            │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │            ModuleLoader + Validator                     │
//! │  (Per-execution: compile, validate, link)               │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │        ExecutionHandler + Store<ExecutionContext>       │
//! │  (Per-execution, isolated)                              │
//! │  - Memory limits, captured stdio, cancellation          │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod engine;
pub mod executor;
pub mod handler;
pub mod limits;
pub mod loader;
pub mod logs;
pub mod module;
pub mod store;
pub mod validate;

pub use engine::{ModuleCache, WasmEngine};
pub use executor::{WasmExecutor, WASM_ENGINE_NAME};
pub use handler::{ExecutionHandler, ExecutionMonitor, ExecutionState};
pub use loader::{LinkedInstance, ModuleLoader};
pub use logs::{LogManager, LogTail};
pub use module::{CompiledModule, ExportedFunction, FuncSignature, ImportedFunction};
pub use validate::ValidationError;
