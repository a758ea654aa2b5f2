//! The [`Executor`] capability trait and log streaming types.

use async_trait::async_trait;
use bytes::Bytes;

use jobrun_common::{ExecutionOutcome, ExecutionRequest, ExecutorError};

/// Which output stream a [`LogChunk`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// The guest's standard output.
    Stdout,
    /// The guest's standard error.
    Stderr,
}

impl std::fmt::Display for OutputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputKind::Stdout => write!(f, "stdout"),
            OutputKind::Stderr => write!(f, "stderr"),
        }
    }
}

/// A slice of captured output, tagged with its stream.
#[derive(Debug, Clone)]
pub struct LogChunk {
    /// Which stream the bytes came from.
    pub kind: OutputKind,
    /// The captured bytes.
    pub data: Bytes,
}

/// A pull-based reader over an execution's captured output.
///
/// Non-following readers end once the already-captured bytes are
/// delivered; following readers keep yielding new chunks until the
/// execution completes and its output is drained.
#[async_trait]
pub trait LogStream: std::fmt::Debug + Send {
    /// The next chunk of output, or `None` when the stream is exhausted.
    async fn next_chunk(&mut self) -> Option<LogChunk>;
}

/// An execution engine.
///
/// Each engine variant (WASM today; the platform anticipates others)
/// implements this trait and is registered in the
/// [`ExecutorRegistry`](crate::ExecutorRegistry) under its name.
///
/// # Concurrency
///
/// Implementations must support a caller invoking `is_active`, `cancel`,
/// and `output_stream` concurrently with an in-flight `run` for the same
/// execution, without external locking.
#[async_trait]
pub trait Executor: std::fmt::Debug + Send + Sync {
    /// The engine name this executor is registered under.
    fn name(&self) -> &'static str;

    /// Whether this engine is usable on the current node.
    fn is_installed(&self) -> bool;

    /// Run one execution to completion.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures *before* the sandboxed program
    /// starts running (invalid request, resource limits, compile/link
    /// failures). Once the program has started, every failure mode is
    /// folded into the returned [`ExecutionOutcome`].
    async fn run(&self, request: ExecutionRequest) -> Result<ExecutionOutcome, ExecutorError>;

    /// Whether the named execution is currently in its running state.
    ///
    /// Non-blocking; safe to call from any task at any time.
    fn is_active(&self, execution_id: &str) -> bool;

    /// Request best-effort cancellation of the named execution.
    ///
    /// Cancellation is cooperative: the sandboxed program is stopped at
    /// the next point the virtual machine observes the signal.
    ///
    /// # Errors
    ///
    /// Returns `UnknownExecution` if no live execution has this ID.
    async fn cancel(&self, execution_id: &str) -> Result<(), ExecutorError>;

    /// A reader over the execution's captured stdout/stderr.
    ///
    /// With `follow` set, the reader keeps yielding output until the
    /// execution completes; otherwise it ends after the bytes captured
    /// so far.
    ///
    /// # Errors
    ///
    /// Returns `UnknownExecution` if no live execution has this ID.
    fn output_stream(
        &self,
        execution_id: &str,
        follow: bool,
    ) -> Result<Box<dyn LogStream>, ExecutorError>;
}
