//! Error types shared across the engine
//!
//! Every error is scoped to a single scan pipeline or store call; none of
//! them is fatal to the process.

use std::path::PathBuf;

use thiserror::Error;

use crate::runner::ProcessOutput;

/// Problems detectable before anything is executed
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Scan target is empty")]
    EmptyTarget,

    #[error("Script category '{category}' and explicit scripts [{scripts}] are mutually exclusive")]
    ConflictingScriptSelectors { category: String, scripts: String },
}

/// Failures of the external scanner process
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Failed to start scanner process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Scanner exited with code {exit_code:?}")]
    NonZeroExit {
        exit_code: Option<i32>,
        partial: ProcessOutput,
    },

    #[error("Scanner process was cancelled")]
    Cancelled { partial: ProcessOutput },
}

impl ExecutionError {
    /// Output captured before the failure, if any
    pub fn partial_output(&self) -> Option<&ProcessOutput> {
        match self {
            ExecutionError::Spawn(_) => None,
            ExecutionError::NonZeroExit { partial, .. } => Some(partial),
            ExecutionError::Cancelled { partial } => Some(partial),
        }
    }
}

/// Key-value backend and result store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize '{key}': {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Writing '{key}' needs {required} bytes but the tier holds at most {capacity}")]
    CapacityExceeded {
        key: String,
        required: usize,
        capacity: usize,
    },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Export failures. `RawUnavailable` is recoverable by choosing json or text.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("No stored scan result with id {0}")]
    NotFound(uuid::Uuid),

    #[error("Raw scanner output for {0} is not retained; export as json or text instead")]
    RawUnavailable(uuid::Uuid),

    #[error("Failed to render export: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Settings file failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration syntax in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Could not determine a platform directory for {0}")]
    NoPlatformDir(&'static str),
}

/// Errors that abort a scan pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captured(stdout: &str) -> ProcessOutput {
        ProcessOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: Some(1),
            truncated: false,
        }
    }

    #[test]
    fn test_partial_output_only_after_start() {
        let spawn = ExecutionError::Spawn(std::io::Error::new(std::io::ErrorKind::NotFound, "nmap"));
        assert!(spawn.partial_output().is_none());

        let exit = ExecutionError::NonZeroExit {
            exit_code: Some(1),
            partial: captured("<nmaprun>"),
        };
        assert_eq!(exit.partial_output().map(|p| p.stdout.as_str()), Some("<nmaprun>"));

        let cancelled = ExecutionError::Cancelled { partial: captured("") };
        assert!(cancelled.partial_output().is_some());
    }
}
