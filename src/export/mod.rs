//! Export of stored scan results
//!
//! Three encodings: the full result as pretty JSON, a Markdown-like text
//! report, and the scanner's raw output when the session tier still has it.

use std::fmt::{self, Write};
use std::str::FromStr;

use uuid::Uuid;

use crate::errors::ExportError;
use crate::models::{HostRecord, ScanResult};
use crate::store::ResultStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Text,
    Raw,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Text => "text",
            ExportFormat::Raw => "raw",
        }
    }

    /// File extension used by [`suggested_filename`]
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Text => "txt",
            ExportFormat::Raw => "xml",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "text" | "txt" => Ok(ExportFormat::Text),
            "raw" | "xml" => Ok(ExportFormat::Raw),
            other => Err(format!("Unknown export format: {} (expected json, text or raw)", other)),
        }
    }
}

/// Render stored result `id` in `format`
pub fn export(store: &ResultStore, id: Uuid, format: ExportFormat) -> Result<Vec<u8>, ExportError> {
    let result = store.get(id).ok_or(ExportError::NotFound(id))?;
    render(&result, format)
}

/// Render an already loaded result
pub fn render(result: &ScanResult, format: ExportFormat) -> Result<Vec<u8>, ExportError> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_vec_pretty(result)?),
        ExportFormat::Text => Ok(text_report(result).into_bytes()),
        ExportFormat::Raw => result
            .raw_payload
            .as_ref()
            .map(|raw| raw.as_bytes().to_vec())
            .ok_or(ExportError::RawUnavailable(result.id)),
    }
}

/// `scan_<target>_<YYYY-MM-DD>.<ext>` with filesystem-unsafe characters replaced
pub fn suggested_filename(result: &ScanResult, format: ExportFormat) -> String {
    let target: String = result
        .target
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    format!(
        "scan_{}_{}.{}",
        target,
        result.timestamp.format("%Y-%m-%d"),
        format.extension()
    )
}

/// Deterministic report built from the host tree
pub fn text_report(result: &ScanResult) -> String {
    let mut report = String::new();
    // Writing to a String cannot fail
    let _ = write_report(&mut report, result);
    report
}

fn write_report(out: &mut String, result: &ScanResult) -> fmt::Result {
    writeln!(out, "# Scan report")?;
    writeln!(out)?;
    writeln!(out, "Name: {}", result.display_name.as_deref().unwrap_or("Untitled"))?;
    writeln!(out, "Date: {}", result.timestamp.to_rfc3339())?;
    writeln!(out, "Target: {}", result.target)?;
    writeln!(out, "Scan type: {}", result.scan_type)?;
    writeln!(out, "Duration: {:.2} seconds", result.duration_seconds)?;
    writeln!(out, "Command: {}", result.command)?;
    writeln!(out)?;

    if result.hosts.is_empty() {
        writeln!(out, "No hosts found.")?;
        return Ok(());
    }

    writeln!(out, "## Discovered hosts ({})", result.hosts.len())?;
    writeln!(out)?;

    for (index, host) in result.hosts.iter().enumerate() {
        write_host(out, index + 1, host)?;
        writeln!(out)?;
    }

    Ok(())
}

fn write_host(out: &mut String, number: usize, host: &HostRecord) -> fmt::Result {
    let addresses = if host.addresses.is_empty() {
        "Unknown address".to_string()
    } else {
        host.addresses
            .iter()
            .map(|a| format!("{} ({})", a.addr, a.addr_type))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let hostnames = if host.hostnames.is_empty() {
        "None".to_string()
    } else {
        host.hostnames.join(", ")
    };

    writeln!(out, "### Host {}: {}", number, addresses)?;
    writeln!(out, "Hostnames: {}", hostnames)?;
    if let Some(status) = &host.status {
        let reason = if status.reason.is_empty() { "unknown reason" } else { &status.reason };
        writeln!(out, "Status: {} ({})", status.state, reason)?;
    }

    if !host.os_guesses.is_empty() {
        writeln!(out)?;
        writeln!(out, "#### Operating system")?;
        for guess in &host.os_guesses {
            writeln!(out, "- {} ({}% confidence)", guess.name, guess.confidence_percent)?;
        }
    }

    if !host.ports.is_empty() {
        writeln!(out)?;
        writeln!(out, "#### Ports")?;
        writeln!(out, "| Port | Protocol | State | Service | Version |")?;
        writeln!(out, "|------|----------|-------|---------|---------|")?;
        for port in &host.ports {
            let service = port.service.as_ref().map(|s| s.name.as_str()).unwrap_or("-");
            let version = port
                .service
                .as_ref()
                .and_then(|s| {
                    s.product.as_ref().map(|product| match &s.version {
                        Some(version) => format!("{} {}", product, version),
                        None => product.clone(),
                    })
                })
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                port.port_id, port.protocol, port.state, service, version
            )?;
        }

        for port in host.ports.iter().filter(|p| !p.scripts.is_empty()) {
            writeln!(out)?;
            writeln!(out, "#### Scripts on {}/{}", port.port_id, port.protocol)?;
            for script in &port.scripts {
                write_script(out, &script.id, &script.output)?;
            }
        }
    }

    if !host.scripts.is_empty() {
        writeln!(out)?;
        writeln!(out, "#### Scripts")?;
        for script in &host.scripts {
            write_script(out, &script.id, &script.output)?;
        }
    }

    Ok(())
}

fn write_script(out: &mut String, id: &str, output: &str) -> fmt::Result {
    let body = if output.trim().is_empty() { "No output" } else { output };
    writeln!(out, "##### {}", id)?;
    writeln!(out, "```")?;
    writeln!(out, "{}", body)?;
    writeln!(out, "```")?;
    writeln!(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Address, HostStatus, OsGuess, ParsedResult, PortRecord, ScanConfiguration, ScanType,
        ScriptOutput, ServiceInfo,
    };
    use chrono::{TimeZone, Utc};

    fn sample(raw: Option<&str>) -> ScanResult {
        let mut config = ScanConfiguration::new("10.0.0.5", ScanType::ServiceDetect);
        config.display_name = Some("Lab sweep".to_string());
        let host = HostRecord {
            addresses: vec![Address {
                addr: "10.0.0.5".to_string(),
                addr_type: "ipv4".to_string(),
            }],
            hostnames: vec!["web01.lan".to_string()],
            status: Some(HostStatus {
                state: "up".to_string(),
                reason: "syn-ack".to_string(),
            }),
            ports: vec![
                PortRecord {
                    port_id: 80,
                    protocol: "tcp".to_string(),
                    state: "open".to_string(),
                    service: Some(ServiceInfo {
                        name: "http".to_string(),
                        product: Some("nginx".to_string()),
                        version: Some("1.24.0".to_string()),
                    }),
                    scripts: vec![ScriptOutput {
                        id: "http-title".to_string(),
                        output: "Welcome".to_string(),
                    }],
                },
                PortRecord {
                    port_id: 443,
                    protocol: "tcp".to_string(),
                    state: "closed".to_string(),
                    service: None,
                    scripts: Vec::new(),
                },
            ],
            os_guesses: vec![OsGuess {
                name: "Linux 5.x".to_string(),
                confidence_percent: 96,
            }],
            scripts: vec![ScriptOutput {
                id: "clock-skew".to_string(),
                output: String::new(),
            }],
        };
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 14, 30, 0).unwrap();
        ScanResult::new(
            &config,
            "nmap -sS -sV -p 1-1000 -T4 -oX - 10.0.0.5".to_string(),
            ts,
            12.5,
            ParsedResult { hosts: vec![host] },
            raw.map(str::to_string),
        )
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<ExportFormat>(), Ok(ExportFormat::Json));
        assert_eq!("txt".parse::<ExportFormat>(), Ok(ExportFormat::Text));
        assert_eq!("xml".parse::<ExportFormat>(), Ok(ExportFormat::Raw));
        assert!("pdf".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_text_report_layout() {
        let report = text_report(&sample(None));

        assert!(report.starts_with("# Scan report\n\nName: Lab sweep\n"));
        assert!(report.contains("Date: 2024-03-09T14:30:00+00:00\n"));
        assert!(report.contains("Target: 10.0.0.5\n"));
        assert!(report.contains("Scan type: serviceDetect\n"));
        assert!(report.contains("Duration: 12.50 seconds\n"));
        assert!(report.contains("## Discovered hosts (1)"));
        assert!(report.contains("### Host 1: 10.0.0.5 (ipv4)\nHostnames: web01.lan\nStatus: up (syn-ack)\n"));
        assert!(report.contains("- Linux 5.x (96% confidence)"));
        assert!(report.contains("| 80 | tcp | open | http | nginx 1.24.0 |"));
        assert!(report.contains("| 443 | tcp | closed | - | - |"));
        assert!(report.contains("#### Scripts on 80/tcp\n##### http-title\n```\nWelcome\n```"));
        assert!(report.contains("##### clock-skew\n```\nNo output\n```"));
    }

    #[test]
    fn test_text_report_is_deterministic() {
        let result = sample(None);
        assert_eq!(text_report(&result), text_report(&result));
    }

    #[test]
    fn test_text_report_without_hosts() {
        let config = ScanConfiguration::new("10.9.9.9", ScanType::Ping);
        let result = ScanResult::new(&config, "nmap".into(), Utc::now(), 0.5, ParsedResult::default(), None);
        let report = text_report(&result);
        assert!(report.contains("Name: Untitled"));
        assert!(report.ends_with("No hosts found.\n"));
    }

    #[test]
    fn test_raw_requires_payload() {
        let without = sample(None);
        assert!(matches!(
            render(&without, ExportFormat::Raw),
            Err(ExportError::RawUnavailable(id)) if id == without.id
        ));

        let with = sample(Some("<nmaprun/>"));
        assert_eq!(render(&with, ExportFormat::Raw).unwrap(), b"<nmaprun/>".to_vec());
    }

    #[test]
    fn test_json_export_is_full_result() {
        let result = sample(Some("<nmaprun/>"));
        let bytes = render(&result, ExportFormat::Json).unwrap();
        let back: ScanResult = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_export_unknown_id() {
        let store = ResultStore::in_memory().unwrap();
        let id = Uuid::new_v4();
        assert!(matches!(
            export(&store, id, ExportFormat::Json),
            Err(ExportError::NotFound(missing)) if missing == id
        ));
    }

    #[test]
    fn test_suggested_filename() {
        let mut result = sample(None);
        assert_eq!(suggested_filename(&result, ExportFormat::Text), "scan_10.0.0.5_2024-03-09.txt");

        result.target = "10.0.0.0/24 web01".to_string();
        assert_eq!(
            suggested_filename(&result, ExportFormat::Raw),
            "scan_10.0.0.0_24_web01_2024-03-09.xml"
        );
    }
}
