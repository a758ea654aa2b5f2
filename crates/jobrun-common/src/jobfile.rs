//! Job description files.
//!
//! This module defines the TOML schema the CLI accepts:
//! - [`JobFile`]: top-level file structure (engine name, runtime
//!   overrides, the job itself)
//! - [`JobSpec`]: one job: entry module, imports, entrypoint, arguments,
//!   environment, volumes, memory budget
//!
//! A job file is a thin on-disk form of an
//! [`ExecutionRequest`](crate::ExecutionRequest); [`JobFile::to_request`]
//! performs the conversion.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::request::{ExecutionRequest, ModuleReference, VolumeMount};
use crate::RuntimeConfig;

/// Top-level job file structure.
///
/// # Example
///
/// ```toml
/// engine = "wasm"
///
/// [runtime.engine]
/// epoch_interruption = true
///
/// [job]
/// entry = "./modules/main.wasm"
/// alias = "main"
/// entrypoint = "_start"
/// parameters = ["--verbose"]
/// memory_bytes = 536870912
///
/// [job.env]
/// LOG_LEVEL = "debug"
///
/// [[job.imports]]
/// alias = "lib"
/// path = "./modules/lib.wasm"
///
/// [[job.volumes]]
/// host = "./inputs"
/// guest = "/inputs"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobFile {
    /// Which execution engine to dispatch to.
    #[serde(default = "defaults::engine")]
    pub engine: String,

    /// Runtime configuration overrides.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// The job to run.
    pub job: JobSpec,
}

/// One job description.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobSpec {
    /// Path to the entry module.
    pub entry: PathBuf,

    /// Alias for the entry module. Also argv[0] for the guest.
    #[serde(default = "defaults::entry_alias")]
    pub alias: String,

    /// Exported function to invoke.
    #[serde(default = "defaults::entrypoint")]
    pub entrypoint: String,

    /// CLI-style parameters for the guest.
    #[serde(default)]
    pub parameters: Vec<String>,

    /// Environment variables for the guest.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Import modules, instantiated in this order.
    #[serde(default)]
    pub imports: Vec<ImportEntry>,

    /// Host directories exposed to the guest.
    #[serde(default)]
    pub volumes: Vec<VolumeEntry>,

    /// Memory budget in bytes. Zero means "engine default".
    #[serde(default)]
    pub memory_bytes: u64,
}

/// An import module entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImportEntry {
    /// Namespace under which the module's exports are published.
    pub alias: String,

    /// Path to the module.
    pub path: PathBuf,
}

/// A volume mount entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VolumeEntry {
    /// Host directory.
    pub host: PathBuf,

    /// Guest path.
    pub guest: String,
}

impl JobFile {
    /// Load a job file from a TOML file on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, JobFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| JobFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::from_toml(&content)
    }

    /// Parse a job file from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, JobFileError> {
        toml::from_str(content).map_err(|e| JobFileError::Parse {
            message: e.to_string(),
        })
    }

    /// Convert into an [`ExecutionRequest`] with the given identifiers.
    pub fn to_request(&self, execution_id: String, job_id: String) -> ExecutionRequest {
        ExecutionRequest {
            execution_id,
            job_id,
            entry: ModuleReference::new(self.job.alias.clone(), self.job.entry.clone()),
            imports: self
                .job
                .imports
                .iter()
                .map(|i| ModuleReference::new(i.alias.clone(), i.path.clone()))
                .collect(),
            entrypoint: self.job.entrypoint.clone(),
            arguments: self.job.parameters.clone(),
            env: self.job.env.clone(),
            volumes: self
                .job
                .volumes
                .iter()
                .map(|v| VolumeMount {
                    host_path: v.host.clone(),
                    guest_path: v.guest.clone(),
                })
                .collect(),
            memory_bytes: self.job.memory_bytes,
        }
    }
}

/// Job file errors.
#[derive(Debug, thiserror::Error)]
pub enum JobFileError {
    /// Failed to read the job file.
    #[error("Failed to read job file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse the job file.
    #[error("Failed to parse job file: {message}")]
    Parse { message: String },
}

/// Default value functions for serde.
mod defaults {
    pub fn engine() -> String {
        "wasm".to_string()
    }

    pub fn entry_alias() -> String {
        "main".to_string()
    }

    pub fn entrypoint() -> String {
        "_start".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_job() {
        let toml = r#"
            [job]
            entry = "./main.wasm"
        "#;

        let file = JobFile::from_toml(toml).unwrap();

        assert_eq!(file.engine, "wasm");
        assert_eq!(file.job.alias, "main");
        assert_eq!(file.job.entrypoint, "_start");
        assert!(file.job.imports.is_empty());
        assert_eq!(file.job.memory_bytes, 0);
    }

    #[test]
    fn test_parse_full_job() {
        let toml = r#"
            engine = "wasm"

            [runtime.engine]
            epoch_interruption = false

            [job]
            entry = "./modules/main.wasm"
            alias = "app"
            entrypoint = "run"
            parameters = ["--fast", "input.csv"]
            memory_bytes = 536870912

            [job.env]
            LOG_LEVEL = "debug"
            MODE = "batch"

            [[job.imports]]
            alias = "lib"
            path = "./modules/lib.wasm"

            [[job.volumes]]
            host = "./inputs"
            guest = "/inputs"
        "#;

        let file = JobFile::from_toml(toml).unwrap();

        assert!(!file.runtime.engine.epoch_interruption);
        assert_eq!(file.job.alias, "app");
        assert_eq!(file.job.entrypoint, "run");
        assert_eq!(file.job.parameters.len(), 2);
        assert_eq!(file.job.memory_bytes, 536870912);
        assert_eq!(file.job.env.get("MODE").unwrap(), "batch");
        assert_eq!(file.job.imports.len(), 1);
        assert_eq!(file.job.imports[0].alias, "lib");
        assert_eq!(file.job.volumes[0].guest, "/inputs");
    }

    #[test]
    fn test_to_request() {
        let toml = r#"
            [job]
            entry = "./main.wasm"
            parameters = ["x"]

            [[job.imports]]
            alias = "lib"
            path = "./lib.wasm"
        "#;

        let file = JobFile::from_toml(toml).unwrap();
        let request = file.to_request("e-1".into(), "j-1".into());

        assert_eq!(request.execution_id, "e-1");
        assert_eq!(request.entry.alias, "main");
        assert_eq!(request.imports.len(), 1);
        assert_eq!(request.imports[0].alias, "lib");
        assert_eq!(request.argv(), vec!["main", "x"]);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_parse_invalid_toml() {
        let invalid = "this is not valid toml [";
        let result = JobFile::from_toml(invalid);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_entry_rejected() {
        let toml = r#"
            [job]
            alias = "app"
        "#;
        assert!(JobFile::from_toml(toml).is_err());
    }
}
