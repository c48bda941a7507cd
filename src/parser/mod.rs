//! Tolerant parser for the scanner's XML output
//!
//! Each record type has its own extraction pass over a scoped span, so a
//! malformed element only costs that one record. Only complete `<host>`
//! blocks are considered; anything else in the document is ignored.

use crate::models::{
    Address, HostRecord, HostStatus, OsGuess, ParsedResult, PortRecord, ScriptOutput, ServiceInfo,
};

pub mod scanner;

use scanner::{elements, tags};

/// Parse raw scanner output. Never fails; degrades to fewer (or no) hosts.
pub fn parse(raw: &str) -> ParsedResult {
    if raw.trim().is_empty() {
        return ParsedResult::default();
    }

    let hosts: Vec<HostRecord> = elements(raw, "host")
        .into_iter()
        .filter_map(|host| host.body)
        .map(parse_host)
        .collect();

    log::debug!("Parsed {} host block(s) from {} bytes", hosts.len(), raw.len());
    ParsedResult { hosts }
}

fn parse_host(block: &str) -> HostRecord {
    HostRecord {
        addresses: extract_addresses(block),
        hostnames: extract_hostnames(block),
        status: extract_status(block),
        ports: extract_ports(block),
        os_guesses: extract_os_guesses(block),
        scripts: extract_host_scripts(block),
    }
}

fn extract_addresses(block: &str) -> Vec<Address> {
    tags(block, "address")
        .iter()
        .filter_map(|el| {
            Some(Address {
                addr: el.non_empty_attr("addr")?,
                addr_type: el.attr("addrtype")?,
            })
        })
        .collect()
}

fn extract_hostnames(block: &str) -> Vec<String> {
    tags(block, "hostname")
        .iter()
        .filter_map(|el| el.non_empty_attr("name"))
        .collect()
}

fn extract_status(block: &str) -> Option<HostStatus> {
    tags(block, "status").iter().find_map(|el| {
        Some(HostStatus {
            state: el.non_empty_attr("state")?,
            reason: el.attr("reason").unwrap_or_default(),
        })
    })
}

fn extract_ports(block: &str) -> Vec<PortRecord> {
    elements(block, "port")
        .iter()
        .filter_map(|port| {
            // A self-closing port has no state and is never recorded
            let span = port.body?;
            let port_id = port.attr("portid")?.trim().parse::<u16>().ok()?;
            let protocol = port.non_empty_attr("protocol")?;
            let state = tags(span, "state")
                .iter()
                .find_map(|el| el.non_empty_attr("state"))?;

            Some(PortRecord {
                port_id,
                protocol,
                state,
                service: extract_service(span),
                scripts: extract_scripts(span),
            })
        })
        .collect()
}

fn extract_service(port_span: &str) -> Option<ServiceInfo> {
    tags(port_span, "service").iter().find_map(|el| {
        Some(ServiceInfo {
            name: el.non_empty_attr("name")?,
            product: el.non_empty_attr("product"),
            version: el.non_empty_attr("version"),
        })
    })
}

fn extract_os_guesses(block: &str) -> Vec<OsGuess> {
    tags(block, "osmatch")
        .iter()
        .filter_map(|el| {
            let accuracy = el.attr("accuracy")?.trim().parse::<u8>().ok()?;
            Some(OsGuess {
                name: el.non_empty_attr("name")?,
                confidence_percent: accuracy.min(100),
            })
        })
        .collect()
}

/// Host-level scripts live only inside `<hostscript>`
fn extract_host_scripts(block: &str) -> Vec<ScriptOutput> {
    elements(block, "hostscript")
        .iter()
        .filter_map(|el| el.body)
        .flat_map(extract_scripts)
        .collect()
}

fn extract_scripts(span: &str) -> Vec<ScriptOutput> {
    tags(span, "script")
        .iter()
        .filter_map(|el| {
            Some(ScriptOutput {
                id: el.non_empty_attr("id")?,
                output: el.attr("output").unwrap_or_default(),
            })
        })
        .collect()
}
