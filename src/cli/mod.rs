//! CLI argument parsing and validation module
//!
//! Handles command-line interface using clap, including:
//! - Global options (settings file, data directory, verbosity, system log)
//! - `scan` with scan type, ports, timing and script selection
//! - `history`, `show`, `export` and `delete` over stored results

use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use uuid::Uuid;

use crate::constants::MAX_TIMING_LEVEL;
use crate::export::ExportFormat;
use crate::history::pattern_matcher::validate_target_filter;
use crate::models::{ScanType, ScriptSelector};

/// Options shared by every subcommand
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalOptions {
    pub config: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub verbosity: u8,
    pub quiet: bool,
    pub system_log: bool,
}

/// Arguments of `scan`. Timing stays optional so the settings file default applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanArgs {
    pub target: String,
    pub scan_type: ScanType,
    pub ports: Option<String>,
    pub timing: Option<u8>,
    pub script_selector: ScriptSelector,
    pub extra_flags: String,
    pub display_name: Option<String>,
    pub json: bool,
    pub save_raw: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliAction {
    Scan(ScanArgs),
    History { target: Option<String>, json: bool },
    Show { id: Uuid, json: bool },
    Export { id: Uuid, format: ExportFormat, output: Option<PathBuf> },
    Delete { id: Uuid },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliConfig {
    pub global: GlobalOptions,
    pub action: CliAction,
}

fn version() -> &'static str {
    concat!(env!("SCANVAULT_VERSION"), " (", env!("SCANVAULT_GIT_HASH"), ")")
}

fn parse_uuid(value: &str) -> Result<Uuid, String> {
    Uuid::parse_str(value.trim()).map_err(|e| format!("invalid scan id: {}", e))
}

fn id_arg() -> Arg {
    Arg::new("id")
        .value_name("ID")
        .help("Scan result id as shown by `history`")
        .required(true)
        .value_parser(parse_uuid)
}

fn json_arg() -> Arg {
    Arg::new("json")
        .short('j')
        .long("json")
        .help("Output in JSON format")
        .action(ArgAction::SetTrue)
}

/// Full command definition
pub fn build_cli() -> Command {
    let scan_types: Vec<&'static str> = ScanType::ALL.iter().map(|t| t.as_str()).collect();

    Command::new("scanvault")
        .version(version())
        .about("Run network scans and keep their results")
        .long_about(
            "Builds scanner command lines from a scan description, runs them, parses the \
             XML output and keeps results in a size-bounded store with a browsable history.",
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Settings file (TOML)")
                .global(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .value_name("DIR")
                .help("Directory for stored results, overriding the settings file")
                .global(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Increase log detail (-v info, -vv debug)")
                .global(true)
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Only log errors and hide progress and warnings")
                .global(true)
                .conflicts_with("verbose")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("system-log")
                .long("system-log")
                .help("Send logs to the macOS Unified Logging System")
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new("scan")
                .about("Run a scan and store the result")
                .arg(
                    Arg::new("target")
                        .value_name("TARGET")
                        .help("IP address, range or host name")
                        .required(true),
                )
                .arg(
                    Arg::new("type")
                        .short('t')
                        .long("type")
                        .value_name("TYPE")
                        .help("Scan type")
                        .default_value("basic")
                        .value_parser(clap::builder::PossibleValuesParser::new(scan_types)),
                )
                .arg(
                    Arg::new("ports")
                        .short('p')
                        .long("ports")
                        .value_name("PORTS")
                        .help("Port list or range, e.g. 22,80,443 or 1-1000"),
                )
                .arg(
                    Arg::new("timing")
                        .short('T')
                        .long("timing")
                        .value_name("0-5")
                        .help("Timing template")
                        .value_parser(value_parser!(u8).range(0..=MAX_TIMING_LEVEL as i64)),
                )
                .arg(
                    Arg::new("script-category")
                        .long("script-category")
                        .value_name("CATEGORY")
                        .help("Script category such as default, safe or vuln")
                        .conflicts_with("scripts"),
                )
                .arg(
                    Arg::new("scripts")
                        .long("scripts")
                        .value_name("NAMES")
                        .help("Comma-separated script names")
                        .value_delimiter(','),
                )
                .arg(
                    Arg::new("extra")
                        .long("extra")
                        .value_name("FLAGS")
                        .help("Extra scanner flags appended verbatim")
                        .allow_hyphen_values(true),
                )
                .arg(
                    Arg::new("name")
                        .short('n')
                        .long("name")
                        .value_name("NAME")
                        .help("Display name for the stored result"),
                )
                .arg(json_arg())
                .arg(
                    Arg::new("save-raw")
                        .long("save-raw")
                        .value_name("FILE")
                        .help("Also write the raw scanner output to FILE")
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("history")
                .about("List stored scans, newest first")
                .arg(
                    Arg::new("target")
                        .long("target")
                        .value_name("PATTERN")
                        .help("Only scans whose target matches exactly or as a glob"),
                )
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("show")
                .about("Show a stored scan result")
                .arg(id_arg())
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("export")
                .about("Export a stored scan result")
                .arg(id_arg())
                .arg(
                    Arg::new("format")
                        .short('f')
                        .long("format")
                        .value_name("FORMAT")
                        .help("json, text or raw")
                        .default_value("json")
                        .value_parser(|s: &str| s.parse::<ExportFormat>()),
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("FILE")
                        .help("Write to FILE instead of stdout")
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("delete")
                .about("Delete a stored scan result")
                .arg(id_arg()),
        )
}

/// Parse process arguments
pub fn parse_args() -> Result<CliConfig> {
    from_matches(&build_cli().get_matches())
}

/// Parse an explicit argument list; clap errors are returned, not printed
pub fn parse_from<I, T>(args: I) -> Result<CliConfig>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = build_cli().try_get_matches_from(args)?;
    from_matches(&matches)
}

fn from_matches(matches: &ArgMatches) -> Result<CliConfig> {
    let global = GlobalOptions {
        config: matches.get_one::<PathBuf>("config").cloned(),
        data_dir: matches.get_one::<PathBuf>("data-dir").cloned(),
        verbosity: matches.get_count("verbose"),
        quiet: matches.get_flag("quiet"),
        system_log: matches.get_flag("system-log"),
    };

    let action = match matches.subcommand() {
        Some(("scan", sub)) => CliAction::Scan(scan_args(sub)?),
        Some(("history", sub)) => {
            let target = sub.get_one::<String>("target").cloned();
            if let Some(pattern) = &target {
                validate_target_filter(pattern)?;
            }
            CliAction::History {
                target,
                json: sub.get_flag("json"),
            }
        }
        Some(("show", sub)) => CliAction::Show {
            id: required_id(sub)?,
            json: sub.get_flag("json"),
        },
        Some(("export", sub)) => CliAction::Export {
            id: required_id(sub)?,
            format: sub
                .get_one::<ExportFormat>("format")
                .copied()
                .unwrap_or(ExportFormat::Json),
            output: sub.get_one::<PathBuf>("output").cloned(),
        },
        Some(("delete", sub)) => CliAction::Delete {
            id: required_id(sub)?,
        },
        _ => return Err(anyhow!("No command given; see --help")),
    };

    Ok(CliConfig { global, action })
}

fn required_id(matches: &ArgMatches) -> Result<Uuid> {
    matches
        .get_one::<Uuid>("id")
        .copied()
        .ok_or_else(|| anyhow!("Missing scan id"))
}

fn scan_args(matches: &ArgMatches) -> Result<ScanArgs> {
    let target = matches
        .get_one::<String>("target")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| anyhow!("Scan target must not be empty"))?;

    let scan_type = matches
        .get_one::<String>("type")
        .map(|t| t.parse::<ScanType>())
        .transpose()
        .map_err(|e| anyhow!(e))?
        .unwrap_or(ScanType::Basic);

    let script_selector = ScriptSelector {
        category: matches.get_one::<String>("script-category").cloned(),
        scripts: matches
            .get_many::<String>("scripts")
            .map(|values| values.cloned().collect())
            .unwrap_or_default(),
    };

    Ok(ScanArgs {
        target,
        scan_type,
        ports: matches.get_one::<String>("ports").cloned(),
        timing: matches.get_one::<u8>("timing").copied(),
        script_selector,
        extra_flags: matches.get_one::<String>("extra").cloned().unwrap_or_default(),
        display_name: matches.get_one::<String>("name").cloned(),
        json: matches.get_flag("json"),
        save_raw: matches.get_one::<PathBuf>("save-raw").cloned(),
    })
}
