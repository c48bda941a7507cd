//! Logging backends and structured events
//!
//! All code logs through the `log` facade. The binary picks a backend:
//! a `tracing-subscriber` formatter on stderr filtered by `SCANVAULT_LOG`,
//! or on macOS the Unified Logging System via `oslog`.
//!
//! Store and pipeline events are emitted as `message | {json}` lines so they
//! stay greppable in either backend.

use anyhow::{anyhow, Result};
use log::Level;
use serde_json::json;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::constants::LOG_ENV_VAR;

/// Where log records go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogBackend {
    Stderr,
    /// macOS Unified Logging System; falls back to stderr elsewhere
    SystemLog,
}

/// Filter directive for the stderr backend from `-v`/`-q` counts
pub fn default_directive(verbosity: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the process-wide logger. Call once from `main`.
pub fn init(backend: LogBackend, verbosity: u8, quiet: bool) -> Result<()> {
    match backend {
        LogBackend::SystemLog => init_system_log(verbosity, quiet),
        LogBackend::Stderr => init_stderr(verbosity, quiet),
    }
}

fn init_stderr(verbosity: u8, quiet: bool) -> Result<()> {
    // An explicit SCANVAULT_LOG wins over -v/-q
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity, quiet)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("Failed to set logger: {}", e))
}

#[cfg(target_os = "macos")]
fn init_system_log(verbosity: u8, quiet: bool) -> Result<()> {
    use crate::constants::APP_SUBSYSTEM;
    use oslog::OsLogger;

    let logger = OsLogger::new(APP_SUBSYSTEM);
    log::set_boxed_logger(Box::new(logger)).map_err(|e| anyhow!("Failed to set logger: {}", e))?;
    log::set_max_level(match default_directive(verbosity, quiet) {
        "error" => log::LevelFilter::Error,
        "warn" => log::LevelFilter::Warn,
        "info" => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    });
    Ok(())
}

#[cfg(not(target_os = "macos"))]
fn init_system_log(verbosity: u8, quiet: bool) -> Result<()> {
    init_stderr(verbosity, quiet)?;
    log::info!("System log is only available on macOS; logging to stderr");
    Ok(())
}

/// Emit `message | {json}` at `level`
pub fn log_structured(level: Level, message: &str, data: &serde_json::Value) {
    log::log!(level, "{} | {}", message, data);
}

/// Scan about to execute
pub fn log_scan_started(target: &str, command: &str) {
    let data = json!({
        "event": "scan_started",
        "target": target,
        "command": command,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    log_structured(Level::Info, &format!("Scanning {}", target), &data);
}

/// Scan stored, possibly with warnings
pub fn log_scan_finished(id: Uuid, host_count: usize, duration_seconds: f64, warnings: usize) {
    let data = json!({
        "event": "scan_finished",
        "id": id.to_string(),
        "host_count": host_count,
        "duration_seconds": duration_seconds,
        "warning_count": warnings,
    });
    log_structured(Level::Info, "Scan finished", &data);
}

/// Result written to both tiers
pub fn log_result_saved(id: Uuid, durable_bytes: usize) {
    let data = json!({
        "event": "result_saved",
        "id": id.to_string(),
        "durable_bytes": durable_bytes,
    });
    log_structured(Level::Debug, "Stored scan result", &data);
}

/// Results removed from the durable tier; `kind` is `proactive` or `emergency`
pub fn log_eviction(kind: &str, evicted: &[Uuid], durable_bytes: usize, limit_bytes: usize) {
    let data = json!({
        "event": "eviction",
        "kind": kind,
        "evicted": evicted.iter().map(Uuid::to_string).collect::<Vec<_>>(),
        "durable_bytes": durable_bytes,
        "limit_bytes": limit_bytes,
    });
    log_structured(
        Level::Warn,
        &format!("Evicted {} stored result(s)", evicted.len()),
        &data,
    );
}

/// Durable tier could not be written even after emergency eviction
pub fn log_storage_failure(error: &str, context: Option<&str>) {
    let data = json!({
        "event": "storage_failure",
        "message": error,
        "context": context,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    log_structured(Level::Error, error, &data);
}

/// Blob that failed to deserialize and was reset
pub fn log_blob_reset(key: &str, tier: &str, reason: &str) {
    let data = json!({
        "event": "blob_reset",
        "key": key,
        "tier": tier,
        "reason": reason,
    });
    log_structured(Level::Warn, &format!("Discarded corrupted '{}'", key), &data);
}
