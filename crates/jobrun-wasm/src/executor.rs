//! The WASM execution engine's [`Executor`] implementation.
//!
//! [`WasmExecutor`] owns the shared engine, the compiled-module cache,
//! and the epoch ticker, and tracks live executions so a caller can
//! query, cancel, or stream output concurrently with the run. Each
//! execution runs on its own spawned task: a long or hung job never
//! blocks the admission of others, and a host-side panic is contained
//! to that task and converted into a `panic` outcome instead of taking
//! the process down.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, error, info};

use jobrun_common::{ExecutionOutcome, ExecutionRequest, ExecutorError, RuntimeConfig};
use jobrun_executor::{Executor, LogStream};

use crate::engine::{ModuleCache, WasmEngine};
use crate::handler::{ExecutionHandler, ExecutionMonitor};

/// The engine name this executor registers under.
pub const WASM_ENGINE_NAME: &str = "wasm";

/// The WebAssembly execution engine.
pub struct WasmExecutor {
    engine: WasmEngine,
    cache: Arc<ModuleCache>,
    config: RuntimeConfig,
    active: DashMap<String, ExecutionMonitor>,
    epoch_ticker: Option<tokio::task::JoinHandle<()>>,
}

impl WasmExecutor {
    /// Create the executor.
    ///
    /// Must be called within a Tokio runtime when epoch interruption is
    /// enabled: the ticker that drives preemption is spawned here.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be created.
    pub fn new(config: &RuntimeConfig) -> Result<Self, ExecutorError> {
        let engine = WasmEngine::new(&config.engine)?;

        let epoch_ticker = config.engine.epoch_interruption.then(|| {
            let engine = engine.clone();
            let period = Duration::from_millis(config.engine.epoch_tick_ms.max(1));
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    engine.increment_epoch();
                }
            })
        });

        info!(
            epoch_interruption = config.engine.epoch_interruption,
            "WASM executor initialized"
        );

        Ok(Self {
            engine,
            cache: Arc::new(ModuleCache::new()),
            config: config.clone(),
            active: DashMap::new(),
            epoch_ticker,
        })
    }

    /// The monitor for a live execution, if it is known.
    fn monitor(&self, execution_id: &str) -> Result<ExecutionMonitor, ExecutorError> {
        self.active
            .get(execution_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ExecutorError::UnknownExecution {
                execution_id: execution_id.to_string(),
            })
    }
}

impl Drop for WasmExecutor {
    fn drop(&mut self) {
        if let Some(ticker) = self.epoch_ticker.take() {
            ticker.abort();
        }
    }
}

#[async_trait]
impl Executor for WasmExecutor {
    fn name(&self) -> &'static str {
        WASM_ENGINE_NAME
    }

    fn is_installed(&self) -> bool {
        // The WASM engine runs in-process and is always available.
        true
    }

    async fn run(&self, request: ExecutionRequest) -> Result<ExecutionOutcome, ExecutorError> {
        let execution_id = request.execution_id.clone();

        let handler = ExecutionHandler::new(
            self.engine.clone(),
            Arc::clone(&self.cache),
            request,
            self.config.execution.clone(),
        )?;
        let monitor = handler.monitor();

        self.active.insert(execution_id.clone(), monitor.clone());
        let join = tokio::spawn(handler.run()).await;
        self.active.remove(&execution_id);

        match join {
            Ok(run_result) => run_result,
            Err(join_error) if join_error.is_panic() => {
                let detail = panic_detail(&join_error.into_panic());
                error!(
                    execution = %execution_id,
                    detail = %detail,
                    "execution recovered from panic"
                );
                let (stdout, stderr) = monitor.contents();
                Ok(ExecutionOutcome::panicked(
                    format!("WASM executor failed with an internal error: {detail}"),
                    stdout,
                    stderr,
                ))
            }
            Err(join_error) => Err(ExecutorError::internal(format!(
                "execution task aborted: {join_error}"
            ))),
        }
    }

    fn is_active(&self, execution_id: &str) -> bool {
        self.active
            .get(execution_id)
            .is_some_and(|monitor| monitor.is_active())
    }

    async fn cancel(&self, execution_id: &str) -> Result<(), ExecutorError> {
        let monitor = self.monitor(execution_id)?;
        debug!(execution = %execution_id, "cancellation requested");
        monitor.cancel();
        Ok(())
    }

    fn output_stream(
        &self,
        execution_id: &str,
        follow: bool,
    ) -> Result<Box<dyn LogStream>, ExecutorError> {
        let monitor = self.monitor(execution_id)?;
        Ok(Box::new(monitor.tail(follow)))
    }
}

impl std::fmt::Debug for WasmExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmExecutor")
            .field("active", &self.active.len())
            .field("cached_modules", &self.cache.len())
            .finish_non_exhaustive()
    }
}

/// Render a panic payload as text.
fn panic_detail(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_executor_creation() {
        let executor = WasmExecutor::new(&RuntimeConfig::default()).unwrap();
        assert_eq!(executor.name(), WASM_ENGINE_NAME);
        assert!(executor.is_installed());
        assert!(!executor.is_active("nope"));
    }

    #[tokio::test]
    async fn test_unknown_execution_queries() {
        let executor = WasmExecutor::new(&RuntimeConfig::default()).unwrap();

        let err = executor.cancel("missing").await.unwrap_err();
        assert!(matches!(err, ExecutorError::UnknownExecution { .. }));

        let err = executor.output_stream("missing", false).unwrap_err();
        assert!(matches!(err, ExecutorError::UnknownExecution { .. }));
    }

    #[test]
    fn test_panic_detail() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_detail(payload.as_ref()), "boom");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_detail(payload.as_ref()), "bang");

        let payload: Box<dyn std::any::Any + Send> = Box::new(17_u8);
        assert_eq!(panic_detail(payload.as_ref()), "unknown panic");
    }
}
