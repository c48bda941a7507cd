//! Output formatting module
//!
//! Handles:
//! - Human-readable summaries of scan runs, stored results and history
//! - JSON output for scripting (`--json`)
//! - Progress display while the scanner runs

use anyhow::Result;

use crate::models::{HistoryEntry, ScanResult};
use crate::pipeline::{PipelineWarning, ScanRun};

pub mod progress;

/// Human summary of a stored result: one block per host with open ports
pub fn format_result_human(result: &ScanResult) -> String {
    let mut lines = Vec::new();
    let name = result.display_name.as_deref().unwrap_or("(unnamed)");

    lines.push(format!("Scan {} - {}", result.id, name));
    lines.push(format!("  Target:    {}", result.target));
    lines.push(format!("  Type:      {}", result.scan_type));
    lines.push(format!("  Started:   {}", result.timestamp.to_rfc3339()));
    lines.push(format!("  Duration:  {}", format_duration(result.duration_seconds)));
    lines.push(format!("  Command:   {}", result.command));
    lines.push(format!(
        "  Raw:       {}",
        if result.raw_payload.is_some() { "available" } else { "not retained" }
    ));
    lines.push(String::new());

    if result.hosts.is_empty() {
        lines.push("No hosts found.".to_string());
        return lines.join("\n");
    }

    lines.push(format!("{} host(s):", result.host_count()));
    for host in &result.hosts {
        let label = host.primary_address().unwrap_or("unknown address");
        let state = host.status.as_ref().map(|s| s.state.as_str()).unwrap_or("unknown");
        let names = if host.hostnames.is_empty() {
            String::new()
        } else {
            format!(" ({})", host.hostnames.join(", "))
        };
        lines.push(format!("  {}{} [{}]", label, names, state));

        for port in host.open_ports() {
            let service = port
                .service
                .as_ref()
                .map(|s| {
                    let detail: Vec<&str> = [s.product.as_deref(), s.version.as_deref()]
                        .into_iter()
                        .flatten()
                        .collect();
                    if detail.is_empty() {
                        s.name.clone()
                    } else {
                        format!("{} ({})", s.name, detail.join(" "))
                    }
                })
                .unwrap_or_else(|| "-".to_string());
            lines.push(format!("    {:>5}/{:<4} open  {}", port.port_id, port.protocol, service));
        }

        let closed = host.ports.len() - host.open_ports().count();
        if closed > 0 {
            lines.push(format!("    ({} other port(s) not open)", closed));
        }
        if let Some(best) = host.os_guesses.first() {
            lines.push(format!("    OS: {} ({}%)", best.name, best.confidence_percent));
        }
    }

    lines.join("\n")
}

/// Table of history rows, newest first
pub fn format_history_human(entries: &[HistoryEntry]) -> String {
    if entries.is_empty() {
        return "No scans in history.".to_string();
    }

    let mut lines = Vec::with_capacity(entries.len() + 1);
    lines.push(format!(
        "{:<36}  {:<25}  {:<13}  {:>5}  {}",
        "ID", "STARTED", "TYPE", "HOSTS", "TARGET"
    ));
    for entry in entries {
        let target = match &entry.display_name {
            Some(name) => format!("{} ({})", entry.target, name),
            None => entry.target.clone(),
        };
        lines.push(format!(
            "{:<36}  {:<25}  {:<13}  {:>5}  {}",
            entry.id,
            entry.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            entry.scan_type.as_str(),
            entry.host_count,
            target
        ));
    }
    lines.join("\n")
}

pub fn format_warning(warning: &PipelineWarning) -> String {
    format!("Warning: {}", warning)
}

/// Print a finished run: warnings on stderr, the result on stdout
pub fn print_scan_run(run: &ScanRun, json: bool, quiet: bool) -> Result<()> {
    if !quiet {
        for warning in &run.warnings {
            eprintln!("{}", format_warning(warning));
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&run.result.without_raw())?);
    } else {
        println!("{}", format_result_human(&run.result));
        if run.was_cancelled() {
            println!("\nStatus: Interrupted by user");
        }
    }
    Ok(())
}

pub fn print_history(entries: &[HistoryEntry], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(entries)?);
    } else {
        println!("{}", format_history_human(entries));
    }
    Ok(())
}

pub fn print_result(result: &ScanResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        println!("{}", format_result_human(result));
    }
    Ok(())
}

/// `850ms`, `2.41s`, `3m 05s`
pub fn format_duration(seconds: f64) -> String {
    if seconds < 1.0 {
        format!("{}ms", (seconds * 1000.0).round() as u64)
    } else if seconds < 60.0 {
        format!("{:.2}s", seconds)
    } else {
        let total = seconds.round() as u64;
        format!("{}m {:02}s", total / 60, total % 60)
    }
}
