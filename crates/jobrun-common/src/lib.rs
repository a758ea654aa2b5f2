//! Common types, errors, and utilities for jobrun.
//!
//! This crate provides shared functionality used across the jobrun workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for engine and execution settings
//! - The execution request model (modules, volumes, environment)
//! - The execution outcome model (exit code, classification, output)

pub mod config;
pub mod error;
pub mod jobfile;
pub mod outcome;
pub mod request;

pub use config::{EngineConfig, ExecutionConfig, RuntimeConfig};
pub use error::ExecutorError;
pub use jobfile::{JobFile, JobFileError};
pub use outcome::{ExecutionOutcome, OutcomeKind};
pub use request::{ExecutionRequest, ModuleReference, VolumeMount};
