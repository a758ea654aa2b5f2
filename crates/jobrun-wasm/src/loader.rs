//! Module loading and linking.
//!
//! The [`ModuleLoader`] materializes a request's module references into
//! [`CompiledModule`]s and produces a fully linked entry instance:
//!
//! 1. WASI preview 1 host imports are registered on the linker.
//! 2. Import modules are instantiated strictly in request order, each
//!    validated against the modules instantiated before it and then
//!    published to the linker under its alias. A forward reference among
//!    import modules is a link error.
//! 3. The entry module is validated (import satisfaction and entrypoint
//!    shape) and instantiated last.
//!
//! A reference whose bytes fail to compile is tolerated until something
//! actually needs an import from its alias: jobs routinely attach input
//! data alongside real modules, and an unused blob must not fail the
//! run. The failure is remembered so that a module which *does* need
//! that alias reports the compile cause rather than a bare unresolved
//! import.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};
use wasmtime::{Instance, Linker, Store};

use jobrun_common::{ExecutionRequest, ExecutorError, ModuleReference};

use crate::engine::{ModuleCache, WasmEngine};
use crate::module::{compute_hash, CompiledModule};
use crate::store::ExecutionContext;
use crate::validate::{self, ValidationError};

/// The instantiated, running form of a module inside an execution's
/// store.
pub struct LinkedInstance {
    name: String,
    instance: Instance,
}

impl LinkedInstance {
    /// The alias of the module this instance came from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying Wasmtime instance.
    pub fn instance(&self) -> Instance {
        self.instance
    }
}

/// Loads and links the modules of one execution.
pub struct ModuleLoader {
    engine: WasmEngine,
    cache: Arc<ModuleCache>,
}

impl ModuleLoader {
    /// Create a loader over the shared engine and module cache.
    pub fn new(engine: WasmEngine, cache: Arc<ModuleCache>) -> Self {
        Self { engine, cache }
    }

    /// Compile the module at a reference's mount path.
    ///
    /// The mount path may be the module file itself or a directory
    /// containing exactly one file (storage providers commonly wrap
    /// single files in a directory).
    ///
    /// # Errors
    ///
    /// Returns a `Compile` error attributed to the reference's alias if
    /// the path cannot be resolved or read, or the bytes are not a
    /// well-formed module.
    pub fn compile(&self, reference: &ModuleReference) -> Result<CompiledModule, ExecutorError> {
        let path = resolve_module_path(reference)?;
        debug!(alias = %reference.alias, path = %path.display(), "Loading module");

        let bytes = std::fs::read(&path).map_err(|e| {
            ExecutorError::compile(
                &reference.alias,
                format!("reading {}: {e}", path.display()),
            )
        })?;

        let content_hash = compute_hash(&bytes);
        if let Some(module) = self.cache.get(&content_hash) {
            return Ok(CompiledModule::from_module(
                &reference.alias,
                content_hash,
                module,
            ));
        }

        let compiled = CompiledModule::from_bytes(self.engine.inner(), &reference.alias, &bytes)?;
        self.cache
            .insert(compiled.content_hash().to_string(), compiled.module().clone());
        Ok(compiled)
    }

    /// Validate a compiled module against the already-instantiated
    /// providers and bind it into the store.
    ///
    /// The Module Validator runs first; only a module whose required
    /// imports are all satisfied (by the providers or the host linker)
    /// is instantiated.
    ///
    /// # Errors
    ///
    /// Returns a `Link` error carrying the reference's alias and mount
    /// path when a required import is unsatisfied or the runtime rejects
    /// instantiation.
    pub async fn instantiate(
        &self,
        store: &mut Store<ExecutionContext>,
        linker: &Linker<ExecutionContext>,
        reference: &ModuleReference,
        compiled: &CompiledModule,
        providers: &[CompiledModule],
    ) -> Result<LinkedInstance, ExecutorError> {
        let provider_refs: Vec<&CompiledModule> = providers.iter().collect();
        validate::check_imports_satisfied(compiled, &provider_refs)
            .map_err(|e| link_error(reference, e.to_string()))?;

        let instance = linker
            .instantiate_async(&mut *store, compiled.module())
            .await
            .map_err(|e| link_error(reference, e.to_string()))?;

        debug!(alias = %reference.alias, "Module instantiated");
        Ok(LinkedInstance {
            name: reference.alias.clone(),
            instance,
        })
    }

    /// Instantiate all of a request's modules and return the linked
    /// entry instance.
    ///
    /// # Errors
    ///
    /// Returns a `Compile` error if the entry module's bytes are
    /// malformed, or a `Link` error naming the first module whose
    /// requirements cannot be met. Either way the entry function has not
    /// been invoked.
    pub async fn link(
        &self,
        store: &mut Store<ExecutionContext>,
        request: &ExecutionRequest,
    ) -> Result<LinkedInstance, ExecutorError> {
        let mut linker: Linker<ExecutionContext> = Linker::new(self.engine.inner());
        wasmtime_wasi::preview1::add_to_linker_async(&mut linker, |context| &mut context.wasi)
            .map_err(|e| {
                ExecutorError::internal(format!("registering WASI host imports: {e}"))
            })?;

        let mut providers: Vec<CompiledModule> = Vec::new();
        let mut failed: Vec<(String, String)> = Vec::new();

        for reference in &request.imports {
            let compiled = match self.compile(reference) {
                Ok(compiled) => compiled,
                Err(error) => {
                    // Tolerated until some module needs this alias.
                    warn!(
                        alias = %reference.alias,
                        error = %error,
                        "Import reference did not compile; deferring"
                    );
                    failed.push((reference.alias.clone(), error.to_string()));
                    continue;
                }
            };

            attribute_deferred_failures(&compiled, &providers, &failed)
                .map_err(|reason| link_error(reference, reason))?;

            let linked = self
                .instantiate(store, &linker, reference, &compiled, &providers)
                .await?;
            linker
                .instance(&mut *store, &reference.alias, linked.instance())
                .map_err(|e| link_error(reference, e.to_string()))?;

            providers.push(compiled);
        }

        let entry = self.compile(&request.entry)?;

        attribute_deferred_failures(&entry, &providers, &failed)
            .map_err(|reason| link_error(&request.entry, reason))?;
        validate::check_entry_shape(&entry, &request.entrypoint, &[], &[])
            .map_err(|e| link_error(&request.entry, e.to_string()))?;

        let linked = self
            .instantiate(store, &linker, &request.entry, &entry, &providers)
            .await?;

        info!(
            entry = %request.entry.alias,
            imports = providers.len(),
            "Modules instantiated"
        );

        Ok(linked)
    }
}

/// Validate a module's imports against the providers instantiated so
/// far, upgrading an unsatisfied import to the deferred compile failure
/// of its namespace when there is one.
fn attribute_deferred_failures(
    module: &CompiledModule,
    providers: &[CompiledModule],
    failed: &[(String, String)],
) -> Result<(), String> {
    let provider_refs: Vec<&CompiledModule> = providers.iter().collect();
    match validate::check_imports_satisfied(module, &provider_refs) {
        Ok(()) => Ok(()),
        Err(error) => {
            if let ValidationError::UnsatisfiedImport { namespace, .. } = &error {
                if let Some((alias, reason)) = failed.iter().find(|(alias, _)| alias == namespace)
                {
                    return Err(format!(
                        "import module '{alias}' failed to compile: {reason}"
                    ));
                }
            }
            Err(error.to_string())
        }
    }
}

fn link_error(reference: &ModuleReference, reason: String) -> ExecutorError {
    ExecutorError::link(
        &reference.alias,
        reference.mount_path.display().to_string(),
        reason,
    )
}

/// Resolve the actual module file behind a mount path.
fn resolve_module_path(reference: &ModuleReference) -> Result<PathBuf, ExecutorError> {
    let path = &reference.mount_path;
    let metadata = std::fs::metadata(path).map_err(|e| {
        ExecutorError::compile(&reference.alias, format!("{}: {e}", path.display()))
    })?;

    if !metadata.is_dir() {
        return Ok(path.clone());
    }

    // Storage providers commonly wrap a single file into a directory, so
    // a directory holding exactly one file is treated as that file.
    let mut entries = std::fs::read_dir(path)
        .map_err(|e| {
            ExecutorError::compile(&reference.alias, format!("{}: {e}", path.display()))
        })?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            ExecutorError::compile(&reference.alias, format!("{}: {e}", path.display()))
        })?;

    if entries.len() != 1 {
        return Err(ExecutorError::compile(
            &reference.alias,
            format!(
                "expected 1 file in {} but there are {}",
                path.display(),
                entries.len()
            ),
        ));
    }

    Ok(entries.remove(0).path())
}
