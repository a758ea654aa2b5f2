//! Memory budget translation.
//!
//! A job's memory budget arrives in bytes; WebAssembly linear memory is
//! allocated in 64 KiB pages, and a 32-bit linear memory space can
//! address at most 4 GiB. [`page_limit`] converts the former into the
//! latter and rejects budgets the architecture cannot honor. It runs
//! before any module is compiled.

use wasmtime::{StoreLimits, StoreLimitsBuilder};

use jobrun_common::ExecutorError;

/// Size of one WebAssembly linear-memory page.
pub const WASM_PAGE_SIZE: u64 = 65536;

/// Addressable ceiling of a 32-bit linear memory space: 4 GiB.
pub const MAX_LINEAR_MEMORY_BYTES: u64 = 1 << 32;

/// Maximum page count implied by the addressable ceiling.
pub const MAX_MEMORY_PAGES: u64 = MAX_LINEAR_MEMORY_BYTES / WASM_PAGE_SIZE;

/// Translate a memory budget in bytes into a linear-memory page limit.
///
/// The budget is rounded up to whole pages. A budget of zero means "use
/// the engine default" and yields `None` (no explicit limit).
///
/// # Errors
///
/// Returns `ResourceLimitExceeded` when the rounded-up budget exceeds
/// [`MAX_MEMORY_PAGES`]. Exactly 4 GiB is accepted; one byte more is not.
pub fn page_limit(requested_bytes: u64) -> Result<Option<u64>, ExecutorError> {
    if requested_bytes == 0 {
        return Ok(None);
    }

    let pages = requested_bytes.div_ceil(WASM_PAGE_SIZE);
    if pages > MAX_MEMORY_PAGES {
        return Err(ExecutorError::ResourceLimitExceeded {
            requested_bytes,
            max_bytes: MAX_LINEAR_MEMORY_BYTES,
        });
    }

    Ok(Some(pages))
}

/// Build the per-store resource limiter for a translated page limit.
///
/// `None` leaves memory growth unrestricted (engine default).
pub fn store_limits(page_limit: Option<u64>) -> StoreLimits {
    let mut builder = StoreLimitsBuilder::new();
    if let Some(pages) = page_limit {
        let bytes = usize::try_from(pages * WASM_PAGE_SIZE).unwrap_or(usize::MAX);
        builder = builder.memory_size(bytes);
    }
    builder.build()
}
