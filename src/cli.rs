use std::env;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// What `export` writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Dispatch,
    Events,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Write synthetic observations for the last `hours` hours.
    Seed { hours: u32 },
    /// Detect curtailment over the last `days` days and simulate mitigation.
    Detect { days: u32 },
    /// Run one dispatch tick.
    Tick { at: Option<DateTime<Utc>> },
    Metrics { days: u32 },
    Stats { days: u32 },
    Export { kind: ExportKind, out: PathBuf, days: u32 },
    #[cfg(feature = "api")]
    Serve { port: u16 },
}

pub struct CliOptions {
    pub config: Option<PathBuf>,
    pub preset: Option<String>,
    pub db: Option<PathBuf>,
    /// Restricts the command to one region; all configured regions otherwise.
    pub region: Option<String>,
    pub command: Command,
}

const DEFAULT_SEED_HOURS: u32 = 72;
const DEFAULT_DAYS: u32 = 7;
const MAX_DAYS: u32 = 365;
#[cfg(feature = "api")]
const DEFAULT_PORT: u16 = 3000;

pub fn parse_args() -> Result<CliOptions, String> {
    let args: Vec<String> = env::args().skip(1).collect();
    parse_args_from(args)
}

fn parse_args_from(args: Vec<String>) -> Result<CliOptions, String> {
    if args.is_empty() || (args.len() == 1 && (args[0] == "--help" || args[0] == "-h")) {
        print_usage();
        std::process::exit(0);
    }
    parse_options(&args)
}

/// Flags collected before the command decides which ones it needs.
#[derive(Default)]
struct Flags {
    hours: Option<u32>,
    days: Option<u32>,
    at: Option<DateTime<Utc>>,
    out: Option<PathBuf>,
    kind: Option<ExportKind>,
    #[cfg(feature = "api")]
    port: Option<u16>,
}

fn parse_options(args: &[String]) -> Result<CliOptions, String> {
    let mut i = 0usize;
    let mut config = None;
    let mut preset = None;
    let mut db = None;
    let mut region = None;
    let mut command_name: Option<String> = None;
    let mut flags = Flags::default();

    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                let path = args.next_or_err(
                    i,
                    "missing value for --config (expected a TOML file path)",
                )?;
                if config.replace(PathBuf::from(path)).is_some() {
                    return Err("--config provided more than once".to_string());
                }
            }
            "--preset" => {
                i += 1;
                let name =
                    args.next_or_err(i, "missing value for --preset (expected a preset name)")?;
                if preset.replace(name.to_string()).is_some() {
                    return Err("--preset provided more than once".to_string());
                }
            }
            "--db" => {
                i += 1;
                let path = args.next_or_err(i, "missing value for --db (expected a file path)")?;
                db = Some(PathBuf::from(path));
            }
            "--region" => {
                i += 1;
                let code =
                    args.next_or_err(i, "missing value for --region (expected a region code)")?;
                region = Some(code.to_uppercase());
            }
            "--hours" => {
                i += 1;
                let raw = args.next_or_err(i, "missing value for --hours")?;
                flags.hours = Some(parse_number(raw, "--hours")?);
            }
            "--days" => {
                i += 1;
                let raw = args.next_or_err(i, "missing value for --days")?;
                flags.days = Some(parse_number(raw, "--days")?);
            }
            "--at" => {
                i += 1;
                let raw = args.next_or_err(
                    i,
                    "missing value for --at (expected an RFC 3339 timestamp)",
                )?;
                let at = DateTime::parse_from_rfc3339(raw).map_err(|e| {
                    format!("--at value \"{raw}\" is not an RFC 3339 timestamp: {e}")
                })?;
                flags.at = Some(at.with_timezone(&Utc));
            }
            "--out" => {
                i += 1;
                let path = args.next_or_err(i, "missing value for --out (expected a file path)")?;
                flags.out = Some(PathBuf::from(path));
            }
            "--events" => flags.kind = Some(ExportKind::Events),
            "--dispatch" => flags.kind = Some(ExportKind::Dispatch),
            #[cfg(feature = "api")]
            "--port" => {
                i += 1;
                let raw = args.next_or_err(i, "missing value for --port")?;
                flags.port = Some(parse_number(raw, "--port")?);
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other if other.starts_with('-') => return Err(format!("unknown argument: {other}")),
            other => {
                if command_name.replace(other.to_string()).is_some() {
                    return Err(format!("unexpected argument: {other}"));
                }
            }
        }
        i += 1;
    }

    if config.is_some() && preset.is_some() {
        return Err(
            "arguments `--config` and `--preset` are mutually exclusive; choose one source"
                .to_string(),
        );
    }

    let command_name = command_name.ok_or_else(|| "missing command".to_string())?;
    let days = flags.days.unwrap_or(DEFAULT_DAYS);
    if !(1..=MAX_DAYS).contains(&days) {
        return Err(format!("--days must be between 1 and {MAX_DAYS}, got {days}"));
    }
    let command = match command_name.as_str() {
        "seed" => Command::Seed {
            hours: flags.hours.unwrap_or(DEFAULT_SEED_HOURS),
        },
        "detect" => Command::Detect { days },
        "tick" => Command::Tick { at: flags.at },
        "metrics" => Command::Metrics { days },
        "stats" => Command::Stats { days },
        "export" => Command::Export {
            kind: flags.kind.unwrap_or(ExportKind::Dispatch),
            out: flags
                .out
                .ok_or_else(|| "export requires --out <path>".to_string())?,
            days,
        },
        #[cfg(feature = "api")]
        "serve" => Command::Serve {
            port: flags.port.unwrap_or(DEFAULT_PORT),
        },
        other => return Err(format!("unknown command: {other}")),
    };

    Ok(CliOptions {
        config,
        preset,
        db,
        region,
        command,
    })
}

fn parse_number<T: std::str::FromStr>(raw: &str, flag: &str) -> Result<T, String> {
    raw.parse()
        .map_err(|_| format!("{flag} value \"{raw}\" is not a valid number"))
}

trait SliceArgExt {
    fn next_or_err(&self, index: usize, err: &str) -> Result<&str, String>;
}

impl SliceArgExt for [String] {
    fn next_or_err(&self, index: usize, err: &str) -> Result<&str, String> {
        self.get(index)
            .map(String::as_str)
            .ok_or_else(|| err.to_string())
    }
}

pub fn print_usage() {
    eprintln!("grid-balance: curtailment detection and battery dispatch");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  grid-balance [--config <path> | --preset <name>] [--db <path>]");
    eprintln!("               [--region <code>] <command>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  seed    [--hours N]              Write synthetic observations (default 72 h)");
    eprintln!("  detect  [--days N]               Detect curtailment and simulate mitigation");
    eprintln!("  tick    [--at <RFC 3339>]        Run one dispatch tick");
    eprintln!("  metrics [--days N]               Dispatch metrics");
    eprintln!("  stats   [--days N]               Curtailment statistics");
    eprintln!("  export  --out <path> [--events]  Export dispatch log or events as CSV");
    #[cfg(feature = "api")]
    eprintln!("  serve   [--port N]               Start the REST API (default port 3000)");
    eprintln!();
    eprintln!("--days accepts 1 to 365 (default 7).");
}
