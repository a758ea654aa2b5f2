//! Execution output capture.
//!
//! [`LogManager`] owns the stdout/stderr pipes handed to the WASI
//! context, and hands out [`LogTail`] readers over the captured bytes.
//! The pipes share their buffers with every clone, so a tail reader sees
//! output while the execution is still running; `drain` marks the
//! streams complete so following readers terminate once they catch up.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;
use wasmtime_wasi::pipe::MemoryOutputPipe;

use jobrun_executor::{LogChunk, LogStream, OutputKind};

/// Poll interval for following readers between output checks.
const FOLLOW_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured stdout/stderr for one execution.
#[derive(Clone)]
pub struct LogManager {
    stdout: MemoryOutputPipe,
    stderr: MemoryOutputPipe,
    done: watch::Sender<bool>,
}

impl LogManager {
    /// Create a log manager with the given capture capacities.
    ///
    /// Output beyond a stream's capacity is refused to the guest; the
    /// caps bound how much a job can make the node buffer.
    pub fn new(max_stdout_bytes: usize, max_stderr_bytes: usize) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            stdout: MemoryOutputPipe::new(max_stdout_bytes),
            stderr: MemoryOutputPipe::new(max_stderr_bytes),
            done,
        }
    }

    /// The pipes to install as the guest's stdout and stderr.
    pub(crate) fn writers(&self) -> (MemoryOutputPipe, MemoryOutputPipe) {
        (self.stdout.clone(), self.stderr.clone())
    }

    /// Mark the streams complete.
    ///
    /// The pipes write through to their shared buffers, so after the
    /// entry call has returned everything the guest produced is already
    /// visible; this releases following readers once they catch up.
    pub fn drain(&self) {
        let _ = self.done.send(true);
    }

    /// Complete captured output so far.
    pub fn contents(&self) -> (Bytes, Bytes) {
        (self.stdout.contents(), self.stderr.contents())
    }

    /// A reader over the captured output.
    ///
    /// A following reader keeps yielding until [`drain`](Self::drain) has
    /// been called and all bytes are delivered; a non-following reader
    /// ends after the bytes captured so far.
    pub fn tail(&self, follow: bool) -> LogTail {
        LogTail {
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            stdout_pos: 0,
            stderr_pos: 0,
            done: self.done.subscribe(),
            follow,
        }
    }
}

impl std::fmt::Debug for LogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogManager")
            .field("done", &*self.done.borrow())
            .finish_non_exhaustive()
    }
}

/// A pull-based reader over one execution's captured output.
pub struct LogTail {
    stdout: MemoryOutputPipe,
    stderr: MemoryOutputPipe,
    stdout_pos: usize,
    stderr_pos: usize,
    done: watch::Receiver<bool>,
    follow: bool,
}

impl std::fmt::Debug for LogTail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogTail")
            .field("stdout_pos", &self.stdout_pos)
            .field("stderr_pos", &self.stderr_pos)
            .field("follow", &self.follow)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LogStream for LogTail {
    async fn next_chunk(&mut self) -> Option<LogChunk> {
        loop {
            let stdout = self.stdout.contents();
            if stdout.len() > self.stdout_pos {
                let data = stdout.slice(self.stdout_pos..);
                self.stdout_pos = stdout.len();
                return Some(LogChunk {
                    kind: OutputKind::Stdout,
                    data,
                });
            }

            let stderr = self.stderr.contents();
            if stderr.len() > self.stderr_pos {
                let data = stderr.slice(self.stderr_pos..);
                self.stderr_pos = stderr.len();
                return Some(LogChunk {
                    kind: OutputKind::Stderr,
                    data,
                });
            }

            if !self.follow || *self.done.borrow() {
                return None;
            }

            tokio::select! {
                changed = self.done.changed() => {
                    if changed.is_err() {
                        // Writer side is gone; deliver what is left and stop.
                        self.follow = false;
                    }
                }
                () = tokio::time::sleep(FOLLOW_POLL_INTERVAL) => {}
            }
        }
    }
}
