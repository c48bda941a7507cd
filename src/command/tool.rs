//! Scanner executable discovery
//!
//! Probes the platform for the scanner and hands back an explicit
//! [`ToolPath`]. A configured path always wins and skips discovery.

use crate::constants::{DEFAULT_TOOL_NAME, TOOL_VERSION_MARKER, WINDOWS_TOOL_PATHS};
use crate::models::Platform;
use crate::runner::{CancelHandle, ExecOptions, ProcessRunner};

use super::ToolPath;

/// Probes are tiny; keep their buffers small
const PROBE_BUFFER_BYTES: usize = 64 * 1024;

/// Resolve the scanner location, preferring an explicitly configured path
pub async fn resolve_tool<R: ProcessRunner>(
    configured: Option<&str>,
    runner: &R,
    platform: Platform,
) -> Option<ToolPath> {
    if let Some(path) = configured.map(str::trim).filter(|p| !p.is_empty()) {
        log::debug!("Using configured scanner path {}", path);
        return Some(ToolPath::new(path));
    }
    locate_tool(runner, platform).await
}

/// Search the platform for the scanner executable
pub async fn locate_tool<R: ProcessRunner>(runner: &R, platform: Platform) -> Option<ToolPath> {
    let lookup = match platform {
        Platform::Windows => format!("where {}", DEFAULT_TOOL_NAME),
        Platform::Posix => format!("which {}", DEFAULT_TOOL_NAME),
    };

    if let Some(stdout) = probe(runner, &lookup).await {
        if let Some(path) = stdout.lines().map(str::trim).find(|l| !l.is_empty()) {
            log::info!("Found scanner with '{}': {}", lookup, path);
            return Some(ToolPath::new(path));
        }
    }

    if let Some(stdout) = probe(runner, &format!("{} --version", DEFAULT_TOOL_NAME)).await {
        if stdout.contains(TOOL_VERSION_MARKER) {
            log::info!("Found scanner on PATH via --version");
            return Some(ToolPath::default());
        }
    }

    if platform == Platform::Windows {
        for candidate in WINDOWS_TOOL_PATHS {
            let check = format!("if exist \"{}\" echo FOUND", candidate);
            if let Some(stdout) = probe(runner, &check).await {
                if stdout.contains("FOUND") {
                    log::info!("Found scanner at {}", candidate);
                    return Some(ToolPath::new(*candidate));
                }
            }
        }
    }

    log::warn!("Scanner executable not found");
    None
}

/// Run a probe command, returning stdout only on success
async fn probe<R: ProcessRunner>(runner: &R, command: &str) -> Option<String> {
    let options = ExecOptions {
        max_buffer_bytes: PROBE_BUFFER_BYTES,
        ..ExecOptions::default()
    };
    match runner.execute(command, &options, &CancelHandle::new()).await {
        Ok(output) => Some(output.stdout),
        Err(e) => {
            log::debug!("Probe '{}' failed: {}", command, e);
            None
        }
    }
}
