//! The execution outcome model.
//!
//! An [`ExecutionOutcome`] is produced exactly once per execution that
//! reached its running state, and is immutable after creation. Failures
//! before the running state are reported as
//! [`ExecutorError`](crate::ExecutorError) instead; [`ExecutionOutcome::from_error`]
//! exists for collaborators that want a uniform record of both.

use bytes::Bytes;

use crate::ExecutorError;

/// How an execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    /// The entry function ran to completion, either returning cleanly or
    /// calling an explicit process-exit primitive.
    NormalExit,

    /// The entry function failed at runtime (trap, cancellation, or any
    /// error without an explicit exit code).
    Trapped,

    /// The execution never started: a module failed to compile or link.
    LinkError,

    /// An unexpected internal fault in the host-side orchestration.
    Panic,
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeKind::NormalExit => write!(f, "normal-exit"),
            OutcomeKind::Trapped => write!(f, "trapped"),
            OutcomeKind::LinkError => write!(f, "link-error"),
            OutcomeKind::Panic => write!(f, "panic"),
        }
    }
}

/// The final result of one execution.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// The process exit code. Verbatim from the guest's exit call when it
    /// made one; `0` for a clean return; `1` for traps; `-1` for host
    /// panics and never-started records.
    pub exit_code: i32,

    /// Four-way classification of how the execution ended.
    pub kind: OutcomeKind,

    /// Complete captured stdout.
    pub stdout: Bytes,

    /// Complete captured stderr.
    pub stderr: Bytes,

    /// Human-readable failure detail, when there is one.
    pub error_detail: Option<String>,
}

impl ExecutionOutcome {
    /// An execution that exited normally with the given code.
    pub fn normal_exit(exit_code: i32, stdout: Bytes, stderr: Bytes) -> Self {
        Self {
            exit_code,
            kind: OutcomeKind::NormalExit,
            stdout,
            stderr,
            error_detail: None,
        }
    }

    /// An execution whose entry function failed at runtime.
    ///
    /// The exit code is fixed at `1`: the virtual machine does not expose
    /// a more specific one for traps.
    pub fn trapped(detail: impl Into<String>, stdout: Bytes, stderr: Bytes) -> Self {
        Self {
            exit_code: 1,
            kind: OutcomeKind::Trapped,
            stdout,
            stderr,
            error_detail: Some(detail.into()),
        }
    }

    /// An execution aborted by an internal host-side fault.
    pub fn panicked(detail: impl Into<String>, stdout: Bytes, stderr: Bytes) -> Self {
        Self {
            exit_code: -1,
            kind: OutcomeKind::Panic,
            stdout,
            stderr,
            error_detail: Some(detail.into()),
        }
    }

    /// A uniform record for an execution that never started.
    ///
    /// Collaborators that persist one record per execution use this to
    /// fold a pre-running [`ExecutorError`] into outcome shape; the
    /// `LinkError` classification preserves the "never started"
    /// distinction.
    pub fn from_error(error: &ExecutorError) -> Self {
        Self {
            exit_code: -1,
            kind: OutcomeKind::LinkError,
            stdout: Bytes::new(),
            stderr: Bytes::new(),
            error_detail: Some(error.to_string()),
        }
    }

    /// Returns `true` if the sandboxed program completed with exit code 0.
    pub fn is_success(&self) -> bool {
        self.kind == OutcomeKind::NormalExit && self.exit_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_kind_display() {
        assert_eq!(OutcomeKind::NormalExit.to_string(), "normal-exit");
        assert_eq!(OutcomeKind::Trapped.to_string(), "trapped");
        assert_eq!(OutcomeKind::LinkError.to_string(), "link-error");
        assert_eq!(OutcomeKind::Panic.to_string(), "panic");
    }

    #[test]
    fn test_normal_exit() {
        let outcome = ExecutionOutcome::normal_exit(0, Bytes::new(), Bytes::new());
        assert!(outcome.is_success());
        assert!(outcome.error_detail.is_none());

        let outcome = ExecutionOutcome::normal_exit(42, Bytes::new(), Bytes::new());
        assert_eq!(outcome.exit_code, 42);
        assert_eq!(outcome.kind, OutcomeKind::NormalExit);
        assert!(!outcome.is_success());
    }

    #[test]
    fn test_trapped_fixes_exit_code() {
        let outcome =
            ExecutionOutcome::trapped("out of bounds memory access", Bytes::new(), Bytes::new());
        assert_eq!(outcome.exit_code, 1);
        assert_eq!(outcome.kind, OutcomeKind::Trapped);
        assert!(outcome.error_detail.unwrap().contains("out of bounds"));
    }

    #[test]
    fn test_from_error_preserves_detail() {
        let err = ExecutorError::compile("main", "not wasm");
        let outcome = ExecutionOutcome::from_error(&err);
        assert_eq!(outcome.kind, OutcomeKind::LinkError);
        assert_eq!(outcome.exit_code, -1);
        assert!(outcome.error_detail.unwrap().contains("main"));
    }
}
