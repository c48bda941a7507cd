//! Unit tests for data models module
//!
//! Validates serialization shape, script selector rules and the
//! durable-copy helpers on ScanResult.

use super::*;

fn sample_result(raw: Option<&str>) -> ScanResult {
    let config = ScanConfiguration::new("192.168.1.10", ScanType::ServiceDetect);
    let parsed = ParsedResult {
        hosts: vec![HostRecord {
            addresses: vec![Address {
                addr: "192.168.1.10".to_string(),
                addr_type: "ipv4".to_string(),
            }],
            ..HostRecord::default()
        }],
    };
    ScanResult::new(
        &config,
        "nmap -sS -sV -p 1-1000 -T4 -oX - 192.168.1.10".to_string(),
        Utc::now(),
        1.5,
        parsed,
        raw.map(String::from),
    )
}

#[test]
fn test_scan_type_wire_names_round_trip() {
    for scan_type in ScanType::ALL {
        let json = serde_json::to_string(&scan_type).unwrap();
        assert_eq!(json, format!("\"{}\"", scan_type.as_str()));
        assert_eq!(scan_type.as_str().parse::<ScanType>().unwrap(), scan_type);
    }
}

#[test]
fn test_scan_type_parse_is_case_insensitive() {
    assert_eq!("PORTONLY".parse::<ScanType>().unwrap(), ScanType::PortOnly);
    assert_eq!(" tcpconnect ".parse::<ScanType>().unwrap(), ScanType::TcpConnect);
    assert!("syn".parse::<ScanType>().is_err());
}

#[test]
fn test_script_selector_category_wins() {
    let selector = ScriptSelector {
        category: Some("vuln".to_string()),
        scripts: vec!["http-title".to_string()],
    };
    assert!(selector.is_conflicting());
    assert_eq!(selector.resolved().as_deref(), Some("vuln"));
}

#[test]
fn test_script_selector_joins_explicit_list() {
    let selector = ScriptSelector::scripts(["http-title", " ssl-cert ", ""]);
    assert!(!selector.is_conflicting());
    assert_eq!(selector.resolved().as_deref(), Some("http-title,ssl-cert"));
}

#[test]
fn test_script_selector_blank_category_is_absent() {
    let selector = ScriptSelector {
        category: Some("   ".to_string()),
        scripts: vec!["banner".to_string()],
    };
    assert!(!selector.is_conflicting());
    assert_eq!(selector.resolved().as_deref(), Some("banner"));
    assert_eq!(ScriptSelector::default().resolved(), None);
}

#[test]
fn test_raw_payload_omitted_when_absent() {
    let result = sample_result(None);
    let json = serde_json::to_string(&result).unwrap();
    assert!(!json.contains("raw_payload"));

    let with_raw = sample_result(Some("<nmaprun/>"));
    let json = serde_json::to_string(&with_raw).unwrap();
    assert!(json.contains("\"raw_payload\":\"<nmaprun/>\""));
}

#[test]
fn test_without_raw_keeps_identity() {
    let result = sample_result(Some("<nmaprun/>"));
    let durable = result.without_raw();
    assert_eq!(durable.id, result.id);
    assert_eq!(durable.hosts, result.hosts);
    assert!(durable.raw_payload.is_none());
}

#[test]
fn test_history_entry_mirrors_result() {
    let result = sample_result(None);
    let entry = result.history_entry();
    assert_eq!(entry.id, result.id);
    assert_eq!(entry.target, "192.168.1.10");
    assert_eq!(entry.scan_type, ScanType::ServiceDetect);
    assert_eq!(entry.host_count, 1);
}

#[test]
fn test_fresh_ids_are_distinct() {
    let a = sample_result(None);
    let b = sample_result(None);
    assert_ne!(a.id, b.id);
}

#[test]
fn test_configuration_defaults_from_json() {
    let config: ScanConfiguration =
        serde_json::from_str(r#"{"target":"10.0.0.5","scan_type":"ping"}"#).unwrap();
    assert_eq!(config.scan_type, ScanType::Ping);
    assert_eq!(config.timing_level, 4);
    assert!(config.ports.is_none());
    assert_eq!(config.script_selector, ScriptSelector::default());
}
