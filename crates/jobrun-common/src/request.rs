//! The execution request model.
//!
//! An [`ExecutionRequest`] is constructed by the admission collaborator
//! once per execution and is read-only to the engine. It names the entry
//! module, zero or more import modules, the entrypoint function, the
//! argument vector, environment variables, filesystem volumes, and the
//! memory budget.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ExecutorError;

/// Identifies one WebAssembly module within a request.
///
/// The module's bytes are expected to already be materialized on local
/// disk at `mount_path` by an external storage collaborator; the engine
/// never fetches anything remote.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ModuleReference {
    /// Human-readable origin of the module. For import modules this is
    /// also the namespace under which its exports are published to later
    /// modules, so it must match the "module" field of the import headers
    /// that are supposed to resolve against it.
    pub alias: String,

    /// Where the module's bytes live on local disk. May be a file, or a
    /// directory containing exactly one file.
    pub mount_path: PathBuf,
}

impl ModuleReference {
    /// Create a new module reference.
    pub fn new(alias: impl Into<String>, mount_path: impl Into<PathBuf>) -> Self {
        Self {
            alias: alias.into(),
            mount_path: mount_path.into(),
        }
    }
}

/// An already-materialized host directory exposed to the guest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct VolumeMount {
    /// Host directory to expose. Prepared (and later cleaned up) by an
    /// external storage collaborator.
    pub host_path: PathBuf,

    /// Path the guest sees the directory at.
    pub guest_path: String,
}

/// Everything the engine needs to run one job.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionRequest {
    /// Unique identifier for this execution, used in logging and for
    /// `is_active`/`cancel` addressing.
    pub execution_id: String,

    /// Identifier of the job this execution belongs to.
    pub job_id: String,

    /// The module whose entrypoint is invoked.
    pub entry: ModuleReference,

    /// Modules loaded solely to provide exports, instantiated in this
    /// order before the entry module.
    #[serde(default)]
    pub imports: Vec<ModuleReference>,

    /// Name of the exported function to invoke on the entry module.
    pub entrypoint: String,

    /// CLI-style arguments passed to the guest. The entry module's alias
    /// is prepended as argument zero.
    #[serde(default)]
    pub arguments: Vec<String>,

    /// Environment variables. A `BTreeMap` so they are always applied in
    /// lexicographic key order and repeated runs see identical
    /// configuration.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Filesystem volumes exposed to the guest.
    #[serde(default)]
    pub volumes: Vec<VolumeMount>,

    /// Memory budget in bytes. Zero means "use the engine default".
    #[serde(default)]
    pub memory_bytes: u64,
}

impl ExecutionRequest {
    /// Check the structural invariants of the request.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if the entrypoint is empty, any mount
    /// path is empty, or two module references share an alias.
    pub fn validate(&self) -> Result<(), ExecutorError> {
        if self.execution_id.is_empty() {
            return Err(ExecutorError::invalid_request("execution_id is empty"));
        }
        if self.entrypoint.is_empty() {
            return Err(ExecutorError::invalid_request("entrypoint is empty"));
        }

        let mut seen = std::collections::BTreeSet::new();
        for reference in std::iter::once(&self.entry).chain(self.imports.iter()) {
            if reference.alias.is_empty() {
                return Err(ExecutorError::invalid_request(
                    "module reference has an empty alias",
                ));
            }
            if reference.mount_path.as_os_str().is_empty() {
                return Err(ExecutorError::invalid_request(format!(
                    "module '{}' has an empty mount path",
                    reference.alias
                )));
            }
            if !seen.insert(reference.alias.clone()) {
                return Err(ExecutorError::invalid_request(format!(
                    "duplicate module alias '{}'",
                    reference.alias
                )));
            }
        }

        for volume in &self.volumes {
            if volume.guest_path.is_empty() {
                return Err(ExecutorError::invalid_request(format!(
                    "volume '{}' has an empty guest path",
                    volume.host_path.display()
                )));
            }
        }

        Ok(())
    }

    /// The argument vector handed to the guest: the entry alias followed
    /// by the request's parameters.
    pub fn argv(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.arguments.len() + 1);
        args.push(self.entry.alias.clone());
        args.extend(self.arguments.iter().cloned());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ExecutionRequest {
        ExecutionRequest {
            execution_id: "exec-1".into(),
            job_id: "job-1".into(),
            entry: ModuleReference::new("main", "/mnt/main.wasm"),
            imports: vec![],
            entrypoint: "_start".into(),
            arguments: vec![],
            env: BTreeMap::new(),
            volumes: vec![],
            memory_bytes: 0,
        }
    }

    #[test]
    fn test_valid_request() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn test_empty_entrypoint_rejected() {
        let mut req = request();
        req.entrypoint = String::new();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_empty_mount_path_rejected() {
        let mut req = request();
        req.imports.push(ModuleReference::new("lib", ""));
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("lib"));
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let mut req = request();
        req.imports.push(ModuleReference::new("main", "/mnt/other.wasm"));
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_argv_prepends_entry_alias() {
        let mut req = request();
        req.arguments = vec!["--verbose".into(), "input.txt".into()];
        assert_eq!(req.argv(), vec!["main", "--verbose", "input.txt"]);
    }

    #[test]
    fn test_env_iterates_in_key_order() {
        let mut req = request();
        req.env.insert("ZED".into(), "3".into());
        req.env.insert("ALPHA".into(), "1".into());
        req.env.insert("MID".into(), "2".into());

        let keys: Vec<&str> = req.env.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["ALPHA", "MID", "ZED"]);
    }
}
