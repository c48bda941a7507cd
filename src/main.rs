#![forbid(unsafe_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::sync::mpsc;

use scanvault::cli::{self, CliAction, ScanArgs};
use scanvault::command::tool::resolve_tool;
use scanvault::config::AppConfig;
use scanvault::errors::ExportError;
use scanvault::export::{self, ExportFormat};
use scanvault::logging::{self, LogBackend};
use scanvault::models::{Platform, ScanConfiguration};
use scanvault::output::{self, progress::ScanProgress};
use scanvault::pipeline::ScanPipeline;
use scanvault::runner::{CancelHandle, ExecOptions, ShellRunner};
use scanvault::store::backend::{FileStore, KeyValueStore, MemoryStore};
use scanvault::store::ResultStore;

/// Spinner redraw interval while waiting for output
const PROGRESS_TICK: Duration = Duration::from_millis(120);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::parse_args()?;
    let global = &cli.global;

    let backend = if global.system_log {
        LogBackend::SystemLog
    } else {
        LogBackend::Stderr
    };
    logging::init(backend, global.verbosity, global.quiet)?;

    let mut config = AppConfig::load(global.config.as_deref())?;
    if let Some(dir) = &global.data_dir {
        config.storage.data_dir = Some(dir.clone());
    }
    let store = Arc::new(open_store(&config)?);

    match cli.action {
        CliAction::Scan(args) => run_scan(&config, store, args, global.quiet).await,
        CliAction::History { target, json } => {
            let entries = match target {
                Some(pattern) => store.filter_history(&pattern),
                None => store.list_history(),
            };
            output::print_history(&entries, json)
        }
        CliAction::Show { id, json } => {
            let result = store
                .get(id)
                .ok_or_else(|| anyhow!("No stored scan result with id {}", id))?;
            output::print_result(&result, json)
        }
        CliAction::Export { id, format, output } => {
            run_export(&store, id, format, output.as_deref())
        }
        CliAction::Delete { id } => {
            if store.delete(id)? {
                if !global.quiet {
                    eprintln!("Deleted scan {}", id);
                }
                Ok(())
            } else {
                Err(anyhow!("No stored scan result with id {}", id))
            }
        }
    }
}

/// Durable tier in the data directory, ephemeral tier in memory
fn open_store(config: &AppConfig) -> Result<ResultStore> {
    let dir = config.data_dir()?;
    log::debug!("Using data directory {}", dir.display());

    let mut durable = FileStore::new(dir);
    if let Some(capacity) = config.storage.durable_capacity_bytes {
        durable = durable.with_capacity(capacity);
    }
    let durable: Arc<dyn KeyValueStore> = Arc::new(durable);
    let ephemeral: Arc<dyn KeyValueStore> =
        Arc::new(MemoryStore::with_capacity(config.storage.session_capacity_bytes));

    ResultStore::open(
        durable,
        ephemeral,
        config.storage.eviction_policy(),
        config.storage.history_max,
    )
    .context("Failed to open result store")
}

async fn run_scan(
    config: &AppConfig,
    store: Arc<ResultStore>,
    args: ScanArgs,
    quiet: bool,
) -> Result<()> {
    let platform = Platform::current();
    let runner = ShellRunner::new(platform);
    let tool = resolve_tool(config.runner.tool_path.as_deref(), &runner, platform)
        .await
        .ok_or_else(|| {
            anyhow!("Scanner not found; install nmap or set runner.tool_path in the settings file")
        })?;

    let scan = ScanConfiguration {
        target: args.target.clone(),
        scan_type: args.scan_type,
        ports: args.ports,
        timing_level: args.timing.unwrap_or(config.scan.default_timing),
        script_selector: args.script_selector,
        extra_flags: args.extra_flags,
        display_name: args.display_name,
    };

    let (chunks_tx, mut chunks_rx) = mpsc::unbounded_channel();
    let exec = ExecOptions {
        max_buffer_bytes: config.runner.max_buffer_bytes,
        env: config.runner.env.clone(),
        output: Some(chunks_tx),
    };
    let pipeline = ScanPipeline::new(runner, store, tool, platform).with_exec_options(exec);

    let cancel = CancelHandle::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupt received, stopping scan");
            on_interrupt.cancel();
        }
    });

    let mut progress = ScanProgress::new(&args.target, quiet || args.json);
    let mut ticker = tokio::time::interval(PROGRESS_TICK);
    let run = pipeline.run(&scan, &cancel);
    tokio::pin!(run);

    let outcome = loop {
        tokio::select! {
            outcome = &mut run => break outcome,
            Some(chunk) = chunks_rx.recv() => progress.observe(&chunk),
            _ = ticker.tick() => progress.tick(),
        }
    };

    let run = match outcome {
        Ok(run) => run,
        Err(e) => {
            drop(progress);
            return Err(e.into());
        }
    };
    progress.complete(&format!(
        "Scan finished: {} host(s) in {}",
        run.result.host_count(),
        output::format_duration(run.result.duration_seconds)
    ));
    drop(progress);

    if let Some(path) = &args.save_raw {
        match &run.result.raw_payload {
            Some(raw) => std::fs::write(path, raw)
                .with_context(|| format!("Failed to write raw output to {}", path.display()))?,
            None => log::warn!("Scanner produced no output; {} not written", path.display()),
        }
    }

    output::print_scan_run(&run, args.json, quiet)
}

fn run_export(
    store: &ResultStore,
    id: uuid::Uuid,
    format: ExportFormat,
    path: Option<&Path>,
) -> Result<()> {
    let bytes = match export::export(store, id, format) {
        Ok(bytes) => bytes,
        Err(ExportError::RawUnavailable(id)) => {
            return Err(anyhow!(
                "Raw output for {} is only kept until the process exits; use --format json or --format text",
                id
            ));
        }
        Err(e) => return Err(e.into()),
    };

    match path {
        Some(path) => {
            // A directory gets the conventional file name
            let path = if path.is_dir() {
                let result = store
                    .get(id)
                    .ok_or_else(|| anyhow!("No stored scan result with id {}", id))?;
                path.join(export::suggested_filename(&result, format))
            } else {
                path.to_path_buf()
            };
            std::fs::write(&path, &bytes)
                .with_context(|| format!("Failed to write export to {}", path.display()))?;
            log::info!("Exported scan {} to {}", id, path.display());
        }
        None => {
            use std::io::Write;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes)?;
            if !bytes.ends_with(b"\n") {
                stdout.write_all(b"\n")?;
            }
        }
    }
    Ok(())
}
