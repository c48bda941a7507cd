#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{Duration, TimeZone, Utc};
use scanvault::errors::ExecutionError;
use scanvault::models::{HostRecord, ParsedResult, ScanConfiguration, ScanResult, ScanType};
use scanvault::runner::{CancelHandle, ExecOptions, OutputChunk, ProcessOutput, ProcessRunner};
use scanvault::store::{EvictionPolicy, FileStore, KeyValueStore, MemoryStore, ResultStore};

/// Two live hosts; the first has an open http port and a closed telnet port
pub const TWO_HOSTS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<nmaprun scanner="nmap" args="nmap -sV -T4 -oX - 10.0.0.0/30">
<host starttime="1700000000" endtime="1700000003">
  <status state="up" reason="syn-ack" reason_ttl="63"/>
  <address addr="10.0.0.1" addrtype="ipv4"/>
  <hostnames><hostname name="gw.lan" type="PTR"/></hostnames>
  <ports>
    <port protocol="tcp" portid="80"><state state="open" reason="syn-ack"/><service name="http" product="nginx" version="1.24.0"/></port>
    <port protocol="tcp" portid="23"><state state="closed" reason="reset"/></port>
  </ports>
</host>
<host>
  <status state="up" reason="echo-reply"/>
  <address addr="10.0.0.2" addrtype="ipv4"/>
</host>
<runstats><finished elapsed="3.10"/></runstats>
</nmaprun>
"#;

/// Runner that replays scripted output and records what it was asked to run
pub struct FakeRunner {
    outcome: Mutex<Option<Result<ProcessOutput, ExecutionError>>>,
    pub commands: Mutex<Vec<String>>,
    /// Waits for cancellation before returning the partial output
    wait_for_cancel: bool,
}

impl FakeRunner {
    pub fn succeeding(stdout: &str) -> Self {
        Self::with_outcome(Ok(output(stdout, Some(0))))
    }

    pub fn with_outcome(outcome: Result<ProcessOutput, ExecutionError>) -> Self {
        Self {
            outcome: Mutex::new(Some(outcome)),
            commands: Mutex::new(Vec::new()),
            wait_for_cancel: false,
        }
    }

    /// Emits `stdout` as a chunk, then blocks until cancelled
    pub fn until_cancelled(stdout: &str) -> Self {
        Self {
            outcome: Mutex::new(Some(Err(ExecutionError::Cancelled {
                partial: output(stdout, None),
            }))),
            commands: Mutex::new(Vec::new()),
            wait_for_cancel: true,
        }
    }
}

impl ProcessRunner for FakeRunner {
    async fn execute(
        &self,
        command: &str,
        options: &ExecOptions,
        cancel: &CancelHandle,
    ) -> Result<ProcessOutput, ExecutionError> {
        self.commands.lock().unwrap().push(command.to_string());
        let outcome = self.outcome.lock().unwrap().take().expect("runner called once");

        let stdout = match &outcome {
            Ok(out) => out.stdout.clone(),
            Err(e) => e.partial_output().map(|p| p.stdout.clone()).unwrap_or_default(),
        };
        if let Some(tx) = &options.output {
            let _ = tx.send(OutputChunk::Stdout(stdout));
        }
        if self.wait_for_cancel {
            cancel.cancelled().await;
        }
        outcome
    }
}

pub fn output(stdout: &str, exit_code: Option<i32>) -> ProcessOutput {
    ProcessOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code,
        truncated: false,
    }
}

/// Result started `offset_secs` after a fixed epoch, with `padding` bytes of host data
pub fn sample_result(target: &str, offset_secs: i64, padding: usize) -> ScanResult {
    let config = ScanConfiguration::new(target, ScanType::Basic);
    let timestamp = Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(offset_secs);
    let host = HostRecord {
        hostnames: vec!["x".repeat(padding)],
        ..HostRecord::default()
    };
    ScanResult::new(
        &config,
        format!("nmap -sS -T4 -oX - {}", target),
        timestamp,
        1.0,
        ParsedResult { hosts: vec![host] },
        Some("<nmaprun/>".to_string()),
    )
}

/// Store over a file-backed durable tier in `dir` and a fresh memory tier
pub fn file_store(dir: &Path, policy: EvictionPolicy) -> ResultStore {
    let durable: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(dir));
    let ephemeral: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    ResultStore::open(durable, ephemeral, policy, 50).unwrap()
}
