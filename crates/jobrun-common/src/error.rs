//! Error types for the jobrun engine.
//!
//! This module defines the error taxonomy using `thiserror`:
//! - [`ExecutorError`]: everything that can prevent an execution from
//!   reaching the running state.
//!
//! Failures that occur *after* the entry function has started are not
//! errors at this level: they are folded into a completed
//! [`ExecutionOutcome`](crate::ExecutionOutcome) so that callers can tell
//! "never started" apart from "ran and failed".

use std::io;

use thiserror::Error;

/// Errors raised before an execution reaches its running state.
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// The requested memory budget exceeds what the virtual machine
    /// architecture can address.
    #[error(
        "resource limit exceeded: requested {requested_bytes} bytes, \
         but the addressable ceiling is {max_bytes} bytes"
    )]
    ResourceLimitExceeded {
        /// The memory budget that was requested.
        requested_bytes: u64,
        /// The architectural ceiling.
        max_bytes: u64,
    },

    /// A referenced module's bytes are not a well-formed WebAssembly module.
    #[error("failed to compile module '{alias}': {reason}")]
    Compile {
        /// Alias of the module reference that failed.
        alias: String,
        /// Description of the compilation failure.
        reason: String,
    },

    /// A module could not be linked: a required import is unsatisfied, a
    /// provider failed, or instantiation was rejected by the runtime.
    #[error("failed to link module '{alias}' (from {path}): {reason}")]
    Link {
        /// Alias of the module that could not be linked.
        alias: String,
        /// The module's mount path, for attribution.
        path: String,
        /// The underlying cause.
        reason: String,
    },

    /// The execution request itself is malformed.
    #[error("invalid execution request: {reason}")]
    InvalidRequest {
        /// Description of what is wrong with the request.
        reason: String,
    },

    /// No executor is registered under the requested engine name.
    #[error("no executor registered for engine '{name}'")]
    EngineNotFound {
        /// The engine name that was requested.
        name: String,
    },

    /// The execution is not known to the executor (wrong ID, or already
    /// completed and reaped).
    #[error("unknown execution: {execution_id}")]
    UnknownExecution {
        /// The execution ID that was queried.
        execution_id: String,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// An internal engine fault that is not attributable to the job.
    #[error("internal executor error: {reason}")]
    Internal {
        /// Description of the fault.
        reason: String,
    },
}

impl ExecutorError {
    /// Create a new `Compile` error.
    pub fn compile(alias: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Compile {
            alias: alias.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `Link` error.
    pub fn link(
        alias: impl Into<String>,
        path: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Link {
            alias: alias.into(),
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `InvalidRequest` error.
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Create a new `Internal` error.
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error indicates the memory budget was
    /// rejected by the resource limit translator.
    pub fn is_resource_limit(&self) -> bool {
        matches!(self, Self::ResourceLimitExceeded { .. })
    }

    /// Returns `true` if this error occurred while compiling or linking
    /// modules, i.e. the job's own inputs are at fault.
    pub fn is_link_failure(&self) -> bool {
        matches!(self, Self::Compile { .. } | Self::Link { .. })
    }
}
