//! Scan pipeline
//!
//! One run is validate → build → execute → parse → store. Only a bad
//! configuration or a scanner that produced nothing usable aborts the run;
//! everything else is carried as a [`PipelineWarning`] on the stored result.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::command::{self, ToolPath};
use crate::constants::BENIGN_STDERR_MARKER;
use crate::errors::{ExecutionError, PipelineError, StoreError};
use crate::logging;
use crate::models::{Platform, ScanConfiguration, ScanResult, ScanType};
use crate::parser;
use crate::runner::{CancelHandle, ExecOptions, ProcessRunner};
use crate::store::ResultStore;

/// Non-fatal conditions observed during a run
#[derive(Debug)]
pub enum PipelineWarning {
    /// Scanner exited nonzero but printed output that was parsed
    NonZeroExit { exit_code: Option<i32> },
    /// Run was cancelled; the result holds whatever was captured
    Cancelled,
    /// Output hit the buffer ceiling
    OutputTruncated { limit_bytes: usize },
    /// Scanner stderr, with benign timing notices removed
    ToolStderr(String),
    /// No hosts could be parsed; raw output is kept in the session tier
    ParseDegradation { raw_bytes: usize },
    /// Durable tier could not be written; the result lives only in the session tier
    StorageFailure(StoreError),
    /// Raw-packet scan types need administrator rights on Windows
    ElevationHint { scan_type: ScanType },
}

impl fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineWarning::NonZeroExit { exit_code: Some(code) } => {
                write!(f, "Scanner exited with code {}; partial output was parsed", code)
            }
            PipelineWarning::NonZeroExit { exit_code: None } => {
                write!(f, "Scanner was terminated by a signal; partial output was parsed")
            }
            PipelineWarning::Cancelled => write!(f, "Scan cancelled; partial results were stored"),
            PipelineWarning::OutputTruncated { limit_bytes } => {
                write!(f, "Scanner output exceeded {} bytes and was truncated", limit_bytes)
            }
            PipelineWarning::ToolStderr(stderr) => write!(f, "Scanner reported: {}", stderr),
            PipelineWarning::ParseDegradation { raw_bytes } => write!(
                f,
                "No hosts could be parsed from {} bytes of output; raw output kept for this session",
                raw_bytes
            ),
            PipelineWarning::StorageFailure(error) => {
                write!(f, "Result kept for this session only: {}", error)
            }
            PipelineWarning::ElevationHint { scan_type } => write!(
                f,
                "{} scans need administrator rights on Windows",
                scan_type
            ),
        }
    }
}

/// A stored result and what went wrong along the way
#[derive(Debug)]
pub struct ScanRun {
    pub result: ScanResult,
    pub warnings: Vec<PipelineWarning>,
}

impl ScanRun {
    pub fn was_cancelled(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, PipelineWarning::Cancelled))
    }
}

pub struct ScanPipeline<R: ProcessRunner> {
    runner: R,
    store: Arc<ResultStore>,
    tool: ToolPath,
    platform: Platform,
    exec: ExecOptions,
}

impl<R: ProcessRunner> ScanPipeline<R> {
    pub fn new(runner: R, store: Arc<ResultStore>, tool: ToolPath, platform: Platform) -> Self {
        Self {
            runner,
            store,
            tool,
            platform,
            exec: ExecOptions::default(),
        }
    }

    /// Buffer ceiling, environment and output streaming for every run
    pub fn with_exec_options(mut self, exec: ExecOptions) -> Self {
        self.exec = exec;
        self
    }

    pub fn store(&self) -> &Arc<ResultStore> {
        &self.store
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Command line `config` would run with, after validation
    pub fn preview(&self, config: &ScanConfiguration) -> Result<String, PipelineError> {
        command::validate(config)?;
        Ok(command::build_command(config, self.platform, &self.tool))
    }

    /// Execute one scan and store its result
    pub async fn run(
        &self,
        config: &ScanConfiguration,
        cancel: &CancelHandle,
    ) -> Result<ScanRun, PipelineError> {
        let command = self.preview(config)?;
        let mut warnings = Vec::new();

        if self.platform == Platform::Windows && needs_elevation(config.scan_type) {
            warnings.push(PipelineWarning::ElevationHint {
                scan_type: config.scan_type,
            });
        }

        logging::log_scan_started(&config.target, &command);
        let started_at = Utc::now();
        let clock = Instant::now();

        let output = match self.runner.execute(&command, &self.exec, cancel).await {
            Ok(output) => output,
            Err(ExecutionError::Cancelled { partial }) => {
                warnings.push(PipelineWarning::Cancelled);
                partial
            }
            Err(ExecutionError::NonZeroExit { exit_code, partial })
                if !partial.stdout.trim().is_empty() =>
            {
                log::warn!("Scanner exited with {:?}, parsing partial output", exit_code);
                warnings.push(PipelineWarning::NonZeroExit { exit_code });
                partial
            }
            Err(error) => {
                if let Some(stderr) = error.partial_output().and_then(|p| significant_stderr(&p.stderr)) {
                    log::error!("Scanner failed: {}", stderr);
                }
                return Err(error.into());
            }
        };
        let duration_seconds = clock.elapsed().as_secs_f64();

        if output.truncated {
            warnings.push(PipelineWarning::OutputTruncated {
                limit_bytes: self.exec.max_buffer_bytes,
            });
        }
        if let Some(stderr) = significant_stderr(&output.stderr) {
            warnings.push(PipelineWarning::ToolStderr(stderr));
        }

        let parsed = parser::parse(&output.stdout);
        if parsed.hosts.is_empty() {
            warnings.push(PipelineWarning::ParseDegradation {
                raw_bytes: output.stdout.len(),
            });
        }

        let raw_payload = Some(output.stdout).filter(|raw| !raw.is_empty());
        let result = ScanResult::new(config, command, started_at, duration_seconds, parsed, raw_payload);

        let report = self.store.save(&result);
        if let Some(error) = report.storage_failure {
            warnings.push(PipelineWarning::StorageFailure(error));
        }

        logging::log_scan_finished(result.id, result.host_count(), duration_seconds, warnings.len());
        Ok(ScanRun { result, warnings })
    }
}

/// Scan types that open raw sockets
fn needs_elevation(scan_type: ScanType) -> bool {
    !matches!(scan_type, ScanType::TcpConnect)
}

/// Stderr with benign timing notices dropped, or None if nothing remains
fn significant_stderr(stderr: &str) -> Option<String> {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.contains(BENIGN_STDERR_MARKER))
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}
