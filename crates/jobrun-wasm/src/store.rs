//! Per-execution store construction.
//!
//! Each execution gets its own [`Store`] with an [`ExecutionContext`]
//! carrying the WASI state and the translated memory limiter. Stores are
//! never shared between executions.

use wasmtime::{Store, StoreLimits};
use wasmtime_wasi::preview1::WasiP1Ctx;

use crate::engine::WasmEngine;
use crate::limits;

/// Per-execution state held by the store.
pub struct ExecutionContext {
    /// WASI state: argv, env, stdio pipes, preopened volumes.
    pub(crate) wasi: WasiP1Ctx,

    /// Memory limiter translated from the job's budget.
    pub(crate) limits: StoreLimits,
}

/// Create a store for one execution.
///
/// The memory limiter is installed before anything runs, and with epoch
/// interruption enabled the store is configured to yield (not trap) on
/// every epoch tick so the entry call can be suspended and cancelled.
pub fn create_store(
    engine: &WasmEngine,
    wasi: WasiP1Ctx,
    page_limit: Option<u64>,
) -> Store<ExecutionContext> {
    let context = ExecutionContext {
        wasi,
        limits: limits::store_limits(page_limit),
    };
    let mut store = Store::new(engine.inner(), context);

    store.limiter(|context| &mut context.limits);

    if engine.config().epoch_interruption {
        store.epoch_deadline_async_yield_and_update(1);
    }

    store
}
