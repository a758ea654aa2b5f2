//! WebAssembly module compilation and signature introspection.
//!
//! This module provides [`CompiledModule`], a wrapper around Wasmtime's
//! [`Module`] that additionally extracts the function imports the module
//! requires and the functions it exports. The validator works entirely
//! off these extracted signatures, so it can be tested without
//! instantiating anything.

use std::hash::{DefaultHasher, Hash, Hasher};

use tracing::{debug, instrument};
use wasmtime::{Engine, ExternType, Module, ValType};

use jobrun_common::ExecutorError;

/// A function's parameter and result types.
#[derive(Debug, Clone)]
pub struct FuncSignature {
    /// Parameter types, in order.
    pub params: Vec<ValType>,
    /// Result types, in order.
    pub results: Vec<ValType>,
}

impl PartialEq for FuncSignature {
    fn eq(&self, other: &Self) -> bool {
        // `wasmtime::ValType` does not implement `PartialEq` (reference
        // types carry a subtyping relationship); `ValType::eq` performs
        // the exact type equality this comparison needs.
        self.params.len() == other.params.len()
            && self.results.len() == other.results.len()
            && self
                .params
                .iter()
                .zip(&other.params)
                .all(|(a, b)| ValType::eq(a, b))
            && self
                .results
                .iter()
                .zip(&other.results)
                .all(|(a, b)| ValType::eq(a, b))
    }
}

impl std::fmt::Display for FuncSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let render = |types: &[ValType]| {
            types
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(f, "({}) -> ({})", render(&self.params), render(&self.results))
    }
}

/// One function import a module requires.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedFunction {
    /// The namespace ("module" field of the import header). For
    /// user-supplied modules this is the alias of the providing module.
    pub namespace: String,
    /// The function name within the namespace.
    pub name: String,
    /// The required signature.
    pub signature: FuncSignature,
}

/// One function a module exports.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedFunction {
    /// The exported name.
    pub name: String,
    /// The exported signature.
    pub signature: FuncSignature,
}

/// A compiled WebAssembly module.
///
/// # Thread Safety
///
/// `CompiledModule` is cheap to clone and safe to share: the underlying
/// Wasmtime module is immutable once compiled, and the signature lists
/// are never mutated after extraction.
#[derive(Clone)]
pub struct CompiledModule {
    /// The alias this module was loaded under.
    name: String,

    /// Hash of the original bytes, used as the cache key.
    content_hash: String,

    /// The compiled Wasmtime module.
    inner: Module,

    /// Function imports the module requires.
    imports: Vec<ImportedFunction>,

    /// Functions the module exports.
    exports: Vec<ExportedFunction>,
}

impl CompiledModule {
    /// Compile a module from raw bytes (binary or, in tests, WAT).
    ///
    /// # Errors
    ///
    /// Returns a `Compile` error attributed to `name` if the bytes are
    /// not a well-formed module.
    #[instrument(skip(engine, bytes), fields(bytes_len = bytes.len()))]
    pub fn from_bytes(engine: &Engine, name: &str, bytes: &[u8]) -> Result<Self, ExecutorError> {
        let module = Module::new(engine, bytes)
            .map_err(|e| ExecutorError::compile(name, e.to_string()))?;

        Ok(Self::from_module(name, compute_hash(bytes), module))
    }

    /// Wrap an already-compiled module, extracting its signatures.
    pub fn from_module(name: &str, content_hash: String, module: Module) -> Self {
        let imports = module
            .imports()
            .filter_map(|import| match import.ty() {
                ExternType::Func(func_ty) => Some(ImportedFunction {
                    namespace: import.module().to_string(),
                    name: import.name().to_string(),
                    signature: FuncSignature {
                        params: func_ty.params().collect(),
                        results: func_ty.results().collect(),
                    },
                }),
                _ => None,
            })
            .collect();

        let exports = module
            .exports()
            .filter_map(|export| match export.ty() {
                ExternType::Func(func_ty) => Some(ExportedFunction {
                    name: export.name().to_string(),
                    signature: FuncSignature {
                        params: func_ty.params().collect(),
                        results: func_ty.results().collect(),
                    },
                }),
                _ => None,
            })
            .collect();

        debug!(name, content_hash = %content_hash, "Module compiled");

        Self {
            name: name.to_string(),
            content_hash,
            inner: module,
            imports,
            exports,
        }
    }

    /// Compile a module from WAT (WebAssembly Text Format).
    ///
    /// This is primarily for testing purposes.
    ///
    /// # Errors
    ///
    /// Returns an error if compilation fails.
    pub fn from_wat(engine: &Engine, name: &str, wat: &str) -> Result<Self, ExecutorError> {
        Self::from_bytes(engine, name, wat.as_bytes())
    }

    /// The alias this module was loaded under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The content hash of the original bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// The inner Wasmtime module.
    pub fn module(&self) -> &Module {
        &self.inner
    }

    /// Function imports this module requires.
    pub fn required_imports(&self) -> &[ImportedFunction] {
        &self.imports
    }

    /// Functions this module exports.
    pub fn exported_functions(&self) -> &[ExportedFunction] {
        &self.exports
    }

    /// Look up an exported function by name.
    pub fn find_export(&self, name: &str) -> Option<&ExportedFunction> {
        self.exports.iter().find(|e| e.name == name)
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("name", &self.name)
            .field("content_hash", &self.content_hash)
            .field("imports", &self.imports.len())
            .field("exports", &self.exports.len())
            .finish_non_exhaustive()
    }
}

/// Compute a hash of the given bytes.
pub(crate) fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
