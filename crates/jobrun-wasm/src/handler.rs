//! Per-execution lifecycle management.
//!
//! [`ExecutionHandler`] owns one execution from admitted request to
//! final outcome:
//!
//! 1. **Preparing**: translate the memory budget, assemble the WASI
//!    configuration (argv, environment in lexicographic key order,
//!    preopened volumes, captured stdio).
//! 2. **Linking**: drive the [`ModuleLoader`](crate::ModuleLoader);
//!    any compile or link failure ends the execution here, before the
//!    entry function is ever invoked.
//! 3. **Running**: invoke the entrypoint under the cancellation signal.
//! 4. **Draining**: complete the captured output streams.
//! 5. **Completed**: classify and publish the outcome.
//!
//! An [`ExecutionMonitor`] is a detached, clonable view over the state
//! machine for concurrent `is_active` / `cancel` / output-stream access
//! without locks.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use wasmtime::Trap;
use wasmtime_wasi::preview1::WasiP1Ctx;
use wasmtime_wasi::{DirPerms, FilePerms, I32Exit, WasiCtxBuilder};

use jobrun_common::{ExecutionConfig, ExecutionOutcome, ExecutionRequest, ExecutorError};

use crate::engine::{ModuleCache, WasmEngine};
use crate::limits;
use crate::loader::ModuleLoader;
use crate::logs::{LogManager, LogTail};
use crate::store;

/// Lifecycle states of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    /// Building the virtual-machine configuration.
    Preparing,
    /// Compiling and instantiating modules.
    Linking,
    /// The entry function is running.
    Running,
    /// The entry call has returned; output is being completed.
    Draining,
    /// An outcome has been produced (or a pre-running error returned).
    Completed,
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionState::Preparing => write!(f, "preparing"),
            ExecutionState::Linking => write!(f, "linking"),
            ExecutionState::Running => write!(f, "running"),
            ExecutionState::Draining => write!(f, "draining"),
            ExecutionState::Completed => write!(f, "completed"),
        }
    }
}

/// Manages the lifecycle of a single WASM execution.
pub struct ExecutionHandler {
    engine: WasmEngine,
    loader: ModuleLoader,
    request: ExecutionRequest,
    config: ExecutionConfig,
    logs: LogManager,
    state: watch::Sender<ExecutionState>,
    cancel: Arc<watch::Sender<bool>>,
}

impl ExecutionHandler {
    /// Create a handler for one execution.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if the request fails structural
    /// validation.
    pub fn new(
        engine: WasmEngine,
        cache: Arc<ModuleCache>,
        request: ExecutionRequest,
        config: ExecutionConfig,
    ) -> Result<Self, ExecutorError> {
        request.validate()?;

        let logs = LogManager::new(config.max_stdout_bytes, config.max_stderr_bytes);
        let (state, _) = watch::channel(ExecutionState::Preparing);
        let (cancel, _) = watch::channel(false);

        Ok(Self {
            loader: ModuleLoader::new(engine.clone(), cache),
            engine,
            request,
            config,
            logs,
            state,
            cancel: Arc::new(cancel),
        })
    }

    /// A detached view for concurrent observation and cancellation.
    pub fn monitor(&self) -> ExecutionMonitor {
        ExecutionMonitor {
            execution_id: self.request.execution_id.clone(),
            state: self.state.subscribe(),
            cancel: Arc::clone(&self.cancel),
            logs: self.logs.clone(),
        }
    }

    /// Run the execution to completion.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures before the entry function
    /// starts (`ResourceLimitExceeded`, `Compile`, `Link`). From the
    /// moment the execution is running, every failure mode is folded
    /// into the returned [`ExecutionOutcome`].
    #[instrument(
        skip(self),
        fields(
            execution = %self.request.execution_id,
            job = %self.request.job_id,
            entrypoint = %self.request.entrypoint,
        )
    )]
    pub async fn run(self) -> Result<ExecutionOutcome, ExecutorError> {
        // Preparing: the budget check runs before any module work.
        let requested_bytes = if self.request.memory_bytes != 0 {
            self.request.memory_bytes
        } else {
            self.config.default_memory_bytes
        };
        let page_limit = limits::page_limit(requested_bytes).map_err(|e| self.fail(e))?;

        let wasi = self.build_wasi_context().map_err(|e| self.fail(e))?;
        let mut wasm_store = store::create_store(&self.engine, wasi, page_limit);

        // Linking: failures here mean the execution never started.
        self.state.send_replace(ExecutionState::Linking);
        debug!("instantiating wasm modules");
        let entry = match self.loader.link(&mut wasm_store, &self.request).await {
            Ok(entry) => entry,
            Err(error) => return Err(self.fail(error)),
        };

        let entry_func = entry
            .instance()
            .get_typed_func::<(), ()>(&mut wasm_store, &self.request.entrypoint)
            .map_err(|e| {
                self.fail(ExecutorError::link(
                    &self.request.entry.alias,
                    self.request.entry.mount_path.display().to_string(),
                    e.to_string(),
                ))
            })?;

        // Cancellation observed at the entry-call boundary: a request
        // that arrives before this point stops the run without starting
        // the sandboxed program.
        let mut cancel_rx = self.cancel.subscribe();
        if *cancel_rx.borrow() {
            warn!("execution cancelled before start");
            return Err(self.fail(ExecutorError::internal(
                "execution cancelled before start",
            )));
        }

        // Running.
        self.state.send_replace(ExecutionState::Running);
        info!("running execution");

        let call_result = tokio::select! {
            result = entry_func.call_async(&mut wasm_store, ()) => Some(result),
            _ = cancel_rx.wait_for(|cancelled| *cancelled) => None,
        };

        // Draining: complete the output before classifying.
        self.state.send_replace(ExecutionState::Draining);
        self.logs.drain();
        let (stdout, stderr) = self.logs.contents();

        let outcome = match call_result {
            None => {
                warn!("execution cancelled");
                ExecutionOutcome::trapped("execution cancelled", stdout, stderr)
            }
            Some(Ok(())) => ExecutionOutcome::normal_exit(0, stdout, stderr),
            Some(Err(error)) => classify_call_error(&error, stdout, stderr),
        };

        self.state.send_replace(ExecutionState::Completed);
        info!(
            exit_code = outcome.exit_code,
            kind = %outcome.kind,
            "execution ended"
        );
        Ok(outcome)
    }

    /// Publish the terminal state before surfacing a pre-running error,
    /// so concurrent observers are released.
    fn fail(&self, error: ExecutorError) -> ExecutorError {
        self.logs.drain();
        self.state.send_replace(ExecutionState::Completed);
        error
    }

    /// Assemble the WASI configuration for this execution.
    ///
    /// The entry module's alias occupies argument zero; environment
    /// variables are applied in lexicographic key order so repeated runs
    /// with the same inputs see identical configuration.
    fn build_wasi_context(&self) -> Result<WasiP1Ctx, ExecutorError> {
        let (stdout, stderr) = self.logs.writers();

        let mut builder = WasiCtxBuilder::new();
        builder
            .stdout(stdout)
            .stderr(stderr)
            .args(&self.request.argv());

        // BTreeMap iteration is already lexicographic by key.
        for (key, value) in &self.request.env {
            builder.env(key, value);
        }

        for volume in &self.request.volumes {
            builder
                .preopened_dir(
                    &volume.host_path,
                    &volume.guest_path,
                    DirPerms::all(),
                    FilePerms::all(),
                )
                .map_err(|e| {
                    ExecutorError::invalid_request(format!(
                        "mounting '{}' at '{}': {e}",
                        volume.host_path.display(),
                        volume.guest_path
                    ))
                })?;
        }

        Ok(builder.build_p1())
    }
}

impl std::fmt::Debug for ExecutionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionHandler")
            .field("execution_id", &self.request.execution_id)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

/// Classify a failed entry call.
///
/// An explicit exit trap carries the guest's own exit code and is a
/// normal exit; anything else is a trap with the exit code fixed at 1,
/// since the virtual machine does not expose a more specific one.
fn classify_call_error(
    error: &wasmtime::Error,
    stdout: bytes::Bytes,
    stderr: bytes::Bytes,
) -> ExecutionOutcome {
    if let Some(exit) = error.downcast_ref::<I32Exit>() {
        return ExecutionOutcome::normal_exit(exit.0, stdout, stderr);
    }

    let detail = match error.downcast_ref::<Trap>() {
        Some(trap) => format!("{trap:?}: {error}"),
        None => error.to_string(),
    };
    ExecutionOutcome::trapped(detail, stdout, stderr)
}

/// A detached, clonable view over one execution.
///
/// All operations are lock-free: state queries read a `watch` channel,
/// cancellation writes one, and output access goes through the shared
/// log buffers.
#[derive(Clone)]
pub struct ExecutionMonitor {
    execution_id: String,
    state: watch::Receiver<ExecutionState>,
    cancel: Arc<watch::Sender<bool>>,
    logs: LogManager,
}

impl ExecutionMonitor {
    /// The execution this monitor observes.
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// The execution's current lifecycle state.
    pub fn state(&self) -> ExecutionState {
        *self.state.borrow()
    }

    /// Whether the sandboxed program has started and not yet produced an
    /// outcome.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state(),
            ExecutionState::Running | ExecutionState::Draining
        )
    }

    /// Wait until the execution becomes active (or terminates without
    /// ever becoming active).
    pub async fn wait_active(&mut self) {
        let _ = self
            .state
            .wait_for(|state| {
                matches!(
                    state,
                    ExecutionState::Running
                        | ExecutionState::Draining
                        | ExecutionState::Completed
                )
            })
            .await;
    }

    /// Wait until the execution has completed.
    pub async fn wait_done(&mut self) {
        let _ = self
            .state
            .wait_for(|state| *state == ExecutionState::Completed)
            .await;
    }

    /// Request best-effort cancellation.
    ///
    /// Observed at the entry-call boundary, and mid-run at the next
    /// epoch yield when the engine's ticker is running.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// The output captured so far.
    pub fn contents(&self) -> (bytes::Bytes, bytes::Bytes) {
        self.logs.contents()
    }

    /// A reader over captured output; with `follow`, it tracks the
    /// execution until completion.
    pub fn tail(&self, follow: bool) -> LogTail {
        self.logs.tail(follow)
    }
}

impl std::fmt::Debug for ExecutionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionMonitor")
            .field("execution_id", &self.execution_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
