//! Execution engine capability interface for jobrun.
//!
//! The platform routes jobs to engines through two seams defined here:
//! - [`Executor`]: what every execution engine can do: run a request to
//!   an outcome, answer "is this execution active", cancel best-effort,
//!   and stream captured output.
//! - [`ExecutorRegistry`]: the only place engine names are resolved to
//!   engine implementations. Orchestration code never branches on engine
//!   identity anywhere else.

pub mod executor;
pub mod registry;

pub use executor::{Executor, LogChunk, LogStream, OutputKind};
pub use registry::ExecutorRegistry;
