//! Module validation.
//!
//! Two independent checks gate instantiation of an entry module:
//! - [`check_imports_satisfied`]: every function import the module
//!   requires resolves to an exact namespace + name + signature match
//!   among the candidate provider modules.
//! - [`check_entry_shape`]: the nominated entrypoint exists with exactly
//!   the expected parameter and result types.
//!
//! Both operate on extracted signatures only and never mutate the
//! modules they inspect, so validating twice yields the same answer.

use thiserror::Error;
use wasmtime::ValType;

use crate::module::CompiledModule;

/// Namespaces satisfied by the host linker rather than by job-supplied
/// provider modules.
pub const HOST_NAMESPACES: &[&str] = &["wasi_snapshot_preview1"];

/// Validation failures.
///
/// These surface to callers wrapped in a
/// [`Link`](jobrun_common::ExecutorError::Link) error naming the module
/// that failed.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    /// A required import has no exact match among the providers.
    ///
    /// A provider export that shares the name but differs in signature is
    /// a non-match, never a partial match.
    #[error(
        "module '{module}' requires import \"{namespace}\".\"{name}\" \
         which no provided module exports with a matching signature"
    )]
    UnsatisfiedImport {
        /// The module whose import is unsatisfied.
        module: String,
        /// The import's namespace.
        namespace: String,
        /// The import's function name.
        name: String,
    },

    /// The nominated entrypoint is not among the module's exports.
    #[error("unable to find the entrypoint '{entrypoint}' in module '{module}'")]
    MissingEntrypoint {
        /// The module that was searched.
        module: String,
        /// The entrypoint that was not found.
        entrypoint: String,
    },

    /// The entrypoint exists but has the wrong number of parameters or
    /// results.
    #[error(
        "entrypoint '{entrypoint}' has {actual_params} parameter(s) and \
         {actual_results} result(s), expected {expected_params} and {expected_results}"
    )]
    EntrypointArity {
        /// The entrypoint that was checked.
        entrypoint: String,
        /// Expected parameter count.
        expected_params: usize,
        /// Actual parameter count.
        actual_params: usize,
        /// Expected result count.
        expected_results: usize,
        /// Actual result count.
        actual_results: usize,
    },

    /// The entrypoint exists with the right arity but a wrong type.
    #[error(
        "entrypoint '{entrypoint}' {position} {index} has type {actual}, expected {expected}"
    )]
    EntrypointType {
        /// The entrypoint that was checked.
        entrypoint: String,
        /// Whether a parameter or a result mismatched.
        position: &'static str,
        /// Zero-based index of the mismatching type.
        index: usize,
        /// The expected type.
        expected: String,
        /// The actual type.
        actual: String,
    },
}

/// Check that every function import `module` requires is satisfied by
/// the candidate providers.
///
/// Providers are searched in the order given; a required import matches
/// a provider when the provider's alias equals the import's namespace
/// and the provider exports a function with the same name whose
/// parameter and result lists are identical in length and element-wise
/// type. Imports from [`HOST_NAMESPACES`] are satisfied by the host
/// linker and skipped here. Checking continues past satisfied imports;
/// the first unsatisfied one is reported.
///
/// # Errors
///
/// Returns [`ValidationError::UnsatisfiedImport`] for the first required
/// import with no exact match.
pub fn check_imports_satisfied(
    module: &CompiledModule,
    providers: &[&CompiledModule],
) -> Result<(), ValidationError> {
    for import in module.required_imports() {
        if HOST_NAMESPACES.contains(&import.namespace.as_str()) {
            continue;
        }

        let satisfied = providers
            .iter()
            .find(|provider| provider.name() == import.namespace)
            .and_then(|provider| provider.find_export(&import.name))
            .is_some_and(|export| export.signature == import.signature);

        if !satisfied {
            return Err(ValidationError::UnsatisfiedImport {
                module: module.name().to_string(),
                namespace: import.namespace.clone(),
                name: import.name.clone(),
            });
        }
    }

    Ok(())
}

/// Check that `entrypoint` exists among `module`'s exports with exactly
/// the expected parameter and result types.
///
/// Jobs conventionally use a `() -> ()` entrypoint: the job's true
/// result is its exit behavior, not a return value.
///
/// # Errors
///
/// Returns a [`ValidationError`] identifying the missing export, the
/// arity mismatch, or the first mismatching type (with its index and
/// the expected vs. actual type).
pub fn check_entry_shape(
    module: &CompiledModule,
    entrypoint: &str,
    expected_params: &[ValType],
    expected_results: &[ValType],
) -> Result<(), ValidationError> {
    let export =
        module
            .find_export(entrypoint)
            .ok_or_else(|| ValidationError::MissingEntrypoint {
                module: module.name().to_string(),
                entrypoint: entrypoint.to_string(),
            })?;

    let signature = &export.signature;
    if signature.params.len() != expected_params.len()
        || signature.results.len() != expected_results.len()
    {
        return Err(ValidationError::EntrypointArity {
            entrypoint: entrypoint.to_string(),
            expected_params: expected_params.len(),
            actual_params: signature.params.len(),
            expected_results: expected_results.len(),
            actual_results: signature.results.len(),
        });
    }

    let positions = [
        ("parameter", &signature.params, expected_params),
        ("result", &signature.results, expected_results),
    ];
    for (position, actual_types, expected_types) in positions {
        for (index, (actual, expected)) in
            actual_types.iter().zip(expected_types.iter()).enumerate()
        {
            if !ValType::eq(actual, expected) {
                return Err(ValidationError::EntrypointType {
                    entrypoint: entrypoint.to_string(),
                    position,
                    index,
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
        }
    }

    Ok(())
}
