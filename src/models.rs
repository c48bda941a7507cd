//! Data models module
//!
//! Defines core data structures:
//! - ScanConfiguration: what to probe and how
//! - ScanResult: the unit of persistence, one per scan run
//! - HostRecord / PortRecord: normalized parser output
//! - HistoryEntry: lightweight index row pointing at a ScanResult

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::DEFAULT_TIMING_LEVEL;

/// Probe mode requested for a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanType {
    Basic,
    PortOnly,
    ServiceDetect,
    OsDetect,
    Scripted,
    Ping,
    TcpConnect,
    Udp,
    Xmas,
    Fin,
    Null,
    Maimon,
    Window,
    Ack,
}

impl ScanType {
    pub const ALL: [ScanType; 14] = [
        ScanType::Basic,
        ScanType::PortOnly,
        ScanType::ServiceDetect,
        ScanType::OsDetect,
        ScanType::Scripted,
        ScanType::Ping,
        ScanType::TcpConnect,
        ScanType::Udp,
        ScanType::Xmas,
        ScanType::Fin,
        ScanType::Null,
        ScanType::Maimon,
        ScanType::Window,
        ScanType::Ack,
    ];

    /// Wire name, identical to the serde representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::Basic => "basic",
            ScanType::PortOnly => "portOnly",
            ScanType::ServiceDetect => "serviceDetect",
            ScanType::OsDetect => "osDetect",
            ScanType::Scripted => "scripted",
            ScanType::Ping => "ping",
            ScanType::TcpConnect => "tcpConnect",
            ScanType::Udp => "udp",
            ScanType::Xmas => "xmas",
            ScanType::Fin => "fin",
            ScanType::Null => "null",
            ScanType::Maimon => "maimon",
            ScanType::Window => "window",
            ScanType::Ack => "ack",
        }
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanType {
    type Err = String;

    /// Accepts the wire name case-insensitively
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScanType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown scan type: {}", s))
    }
}

/// Script selection. The category and the explicit list are mutually
/// exclusive; `validate` rejects configurations that set both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptSelector {
    /// Script category such as `default`, `discovery` or `vuln`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Explicit script names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scripts: Vec<String>,
}

impl ScriptSelector {
    pub fn category(name: impl Into<String>) -> Self {
        Self {
            category: Some(name.into()),
            scripts: Vec::new(),
        }
    }

    pub fn scripts<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            category: None,
            scripts: names.into_iter().map(Into::into).collect(),
        }
    }

    fn category_value(&self) -> Option<&str> {
        self.category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    fn script_values(&self) -> Vec<&str> {
        self.scripts
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// True when both branches carry a value
    pub fn is_conflicting(&self) -> bool {
        self.category_value().is_some() && !self.script_values().is_empty()
    }

    /// Value for `--script=`. Category wins over the explicit list.
    pub fn resolved(&self) -> Option<String> {
        if let Some(category) = self.category_value() {
            return Some(category.to_string());
        }
        let scripts = self.script_values();
        if scripts.is_empty() {
            None
        } else {
            Some(scripts.join(","))
        }
    }
}

/// User-specified scan parameters. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfiguration {
    /// IP, range or host name to probe
    pub target: String,
    pub scan_type: ScanType,
    /// Port list or range (`22,80,443`, `1-1000`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<String>,
    /// Timing template 0-5
    #[serde(default = "default_timing")]
    pub timing_level: u8,
    #[serde(default)]
    pub script_selector: ScriptSelector,
    /// Appended verbatim after the generated flags
    #[serde(default)]
    pub extra_flags: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

fn default_timing() -> u8 {
    DEFAULT_TIMING_LEVEL
}

impl ScanConfiguration {
    pub fn new(target: impl Into<String>, scan_type: ScanType) -> Self {
        Self {
            target: target.into(),
            scan_type,
            ports: None,
            timing_level: DEFAULT_TIMING_LEVEL,
            script_selector: ScriptSelector::default(),
            extra_flags: String::new(),
            display_name: None,
        }
    }
}

/// Network address reported for a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub addr: String,
    /// `ipv4`, `ipv6` or `mac`
    pub addr_type: String,
}

/// Host reachability as reported by the scanner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStatus {
    pub state: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Output of one NSE script, at port or host level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptOutput {
    pub id: String,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsGuess {
    pub name: String,
    pub confidence_percent: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRecord {
    pub port_id: u16,
    pub protocol: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scripts: Vec<ScriptOutput>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    #[serde(default)]
    pub addresses: Vec<Address>,
    #[serde(default)]
    pub hostnames: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<HostStatus>,
    #[serde(default)]
    pub ports: Vec<PortRecord>,
    #[serde(default)]
    pub os_guesses: Vec<OsGuess>,
    #[serde(default)]
    pub scripts: Vec<ScriptOutput>,
}

impl HostRecord {
    /// First address, used as the host's display label
    pub fn primary_address(&self) -> Option<&str> {
        self.addresses.first().map(|a| a.addr.as_str())
    }

    pub fn open_ports(&self) -> impl Iterator<Item = &PortRecord> {
        self.ports.iter().filter(|p| p.state == "open")
    }
}

/// Parser output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedResult {
    pub hosts: Vec<HostRecord>,
}

/// One completed (or degraded) scan run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    /// Assigned once at creation and never reused
    pub id: Uuid,
    /// Scan start time
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: f64,
    /// Exact invocation used
    pub command: String,
    pub target: String,
    pub scan_type: ScanType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub hosts: Vec<HostRecord>,
    /// Unparsed tool output. Only the ephemeral tier keeps it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_payload: Option<String>,
}

impl ScanResult {
    /// Create a result with a fresh id
    pub fn new(
        config: &ScanConfiguration,
        command: String,
        timestamp: DateTime<Utc>,
        duration_seconds: f64,
        parsed: ParsedResult,
        raw_payload: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            duration_seconds,
            command,
            target: config.target.clone(),
            scan_type: config.scan_type,
            display_name: config.display_name.clone(),
            hosts: parsed.hosts,
            raw_payload,
        }
    }

    /// Copy suitable for the durable tier
    pub fn without_raw(&self) -> ScanResult {
        ScanResult {
            raw_payload: None,
            ..self.clone()
        }
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn history_entry(&self) -> HistoryEntry {
        HistoryEntry {
            id: self.id,
            timestamp: self.timestamp,
            target: self.target.clone(),
            scan_type: self.scan_type,
            display_name: self.display_name.clone(),
            host_count: self.host_count(),
        }
    }
}

/// Index row; `id` joins to `ScanResult::id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub target: String,
    pub scan_type: ScanType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub host_count: usize,
}

/// OS family, used only to pick quoting dialects and discovery probes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Posix,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Posix
        }
    }
}

#[cfg(test)]
mod tests;
