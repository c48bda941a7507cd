//! Command construction module
//!
//! Turns a `ScanConfiguration` into the scanner invocation:
//! - Fixed base flags per scan type
//! - Port filter only where the scan type accepts one
//! - Timing, script selection and free-form extra flags
//! - Structured XML output forced on so the parser sees a stable shape
//!
//! Building never fails. Out-of-range values are clamped to safe defaults;
//! conflicting script selectors are the caller's job to reject via
//! [`validate`] before building.

use std::sync::OnceLock;

use regex::Regex;

use crate::constants::{DEFAULT_PORT_RANGE, DEFAULT_TOOL_NAME, MAX_TIMING_LEVEL};
use crate::errors::ConfigurationError;
use crate::models::{Platform, ScanConfiguration, ScanType};

pub mod tool;

/// Flags that make the scanner print XML on stdout
const STRUCTURED_OUTPUT_FLAGS: &str = "-oX -";

/// Script category used by `scripted` scans when nothing is selected
const DEFAULT_SCRIPT_CATEGORY: &str = "default";

/// Location of the scanner executable, threaded explicitly into the builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPath(String);

impl ToolPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ToolPath {
    fn default() -> Self {
        Self(DEFAULT_TOOL_NAME.to_string())
    }
}

/// How a scan type treats the `ports` setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortFilter {
    /// Ports are never passed
    Never,
    /// Ports are always passed, falling back to the default range
    Required,
    /// Ports are passed only when the caller supplied them
    Optional,
}

/// Base flag sequence for a scan type
pub fn base_flags(scan_type: ScanType) -> &'static [&'static str] {
    match scan_type {
        ScanType::Basic => &["-sS"],
        ScanType::PortOnly => &["-sS"],
        ScanType::ServiceDetect => &["-sS", "-sV"],
        ScanType::OsDetect => &["-sS", "-O"],
        ScanType::Scripted => &["-sS", "-sV"],
        ScanType::Ping => &["-sn"],
        ScanType::TcpConnect => &["-sT"],
        ScanType::Udp => &["-sU"],
        ScanType::Xmas => &["-sX"],
        ScanType::Fin => &["-sF"],
        ScanType::Null => &["-sN"],
        ScanType::Maimon => &["-sM"],
        ScanType::Window => &["-sW"],
        ScanType::Ack => &["-sA"],
    }
}

pub fn port_filter(scan_type: ScanType) -> PortFilter {
    match scan_type {
        ScanType::Basic | ScanType::Ping => PortFilter::Never,
        ScanType::PortOnly | ScanType::ServiceDetect => PortFilter::Required,
        _ => PortFilter::Optional,
    }
}

/// Check the configuration before it is built and executed
pub fn validate(config: &ScanConfiguration) -> Result<(), ConfigurationError> {
    if config.target.trim().is_empty() {
        return Err(ConfigurationError::EmptyTarget);
    }

    let selector = &config.script_selector;
    if selector.is_conflicting() {
        return Err(ConfigurationError::ConflictingScriptSelectors {
            category: selector.category.clone().unwrap_or_default(),
            scripts: selector.scripts.join(","),
        });
    }

    Ok(())
}

/// Build the full command line for `config`
pub fn build_command(config: &ScanConfiguration, platform: Platform, tool: &ToolPath) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(12);

    parts.push(quote_arg(tool.as_str(), platform));
    parts.extend(base_flags(config.scan_type).iter().map(|f| f.to_string()));

    let ports = sanitized_ports(config.ports.as_deref());
    match port_filter(config.scan_type) {
        PortFilter::Never => {}
        PortFilter::Required => {
            parts.push("-p".to_string());
            parts.push(ports.unwrap_or(DEFAULT_PORT_RANGE).to_string());
        }
        PortFilter::Optional => {
            if let Some(ports) = ports {
                parts.push("-p".to_string());
                parts.push(ports.to_string());
            }
        }
    }

    parts.push(format!("-T{}", config.timing_level.min(MAX_TIMING_LEVEL)));

    let script = config.script_selector.resolved().or_else(|| {
        (config.scan_type == ScanType::Scripted).then(|| DEFAULT_SCRIPT_CATEGORY.to_string())
    });
    if let Some(script) = script {
        parts.push(format!("--script={}", script));
    }

    let extra = config.extra_flags.trim();
    if !extra.is_empty() {
        parts.push(extra.to_string());
    }

    parts.push(STRUCTURED_OUTPUT_FLAGS.to_string());
    parts.push(quote_arg(config.target.trim(), platform));

    parts.join(" ")
}

fn ports_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Digits, ranges, lists and protocol prefixes such as T:80,U:53
    PATTERN.get_or_init(|| Regex::new(r"^[0-9TUSP:,\-]+$").expect("static regex"))
}

/// Trimmed ports string, or None when blank or not a port expression
fn sanitized_ports(ports: Option<&str>) -> Option<&str> {
    let ports = ports?.trim();
    if ports.is_empty() || !ports_pattern().is_match(ports) {
        if !ports.is_empty() {
            log::warn!("Ignoring malformed port filter '{}'", ports);
        }
        return None;
    }
    Some(ports)
}

/// Quote an argument only when it contains whitespace
pub fn quote_arg(arg: &str, platform: Platform) -> String {
    if !arg.chars().any(char::is_whitespace) {
        return arg.to_string();
    }
    match platform {
        Platform::Windows => format!("\"{}\"", arg.replace('"', "\"\"")),
        Platform::Posix => format!("'{}'", arg.replace('\'', "'\\''")),
    }
}
