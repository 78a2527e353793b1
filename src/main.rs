//! grid-balance entry point: CLI wiring, config loading and command dispatch.

mod cli;

use std::error::Error;
use std::process;
use std::sync::Arc;

use chrono::{DateTime, Duration, DurationRound, Utc};
use tracing::warn;

use grid_balance::config::AppConfig;
use grid_balance::curtailment::{CurtailmentStatistics, detect_and_store, simulate_and_store};
use grid_balance::dispatch::DispatchEngine;
use grid_balance::error::CoreError;
use grid_balance::io::export::{export_dispatch_log, export_events};
use grid_balance::metrics::{DispatchMetrics, lookback};
use grid_balance::store::{SqliteStore, Store, retry_once};
use grid_balance::synthetic::SyntheticGrid;

use cli::{CliOptions, Command, ExportKind};

fn init_tracing() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("grid_balance=info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("warning: tracing subscriber already set");
    }
}

fn load_config(cli: &CliOptions) -> Result<AppConfig, String> {
    // --config takes priority, then --preset, then baseline default
    let mut config = if let Some(ref path) = cli.config {
        AppConfig::from_toml_file(path).map_err(|e| e.to_string())?
    } else if let Some(ref name) = cli.preset {
        AppConfig::from_preset(name).map_err(|e| e.to_string())?
    } else {
        AppConfig::baseline()
    };

    if let Some(ref db) = cli.db {
        config.store.path = db.clone();
    }

    let errors = config.validate();
    if !errors.is_empty() {
        return Err(errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n"));
    }
    Ok(config)
}

/// Regions named on the command line, or every configured region.
fn target_regions(cli: &CliOptions, config: &AppConfig) -> Result<Vec<String>, CoreError> {
    match &cli.region {
        Some(code) => {
            config.region(code)?;
            Ok(vec![code.clone()])
        }
        None => Ok(config.region_codes()),
    }
}

fn window(days: u32) -> Result<(DateTime<Utc>, DateTime<Utc>), CoreError> {
    let end = Utc::now();
    Ok((lookback(end, days)?, end))
}

fn run(cli: &CliOptions, config: AppConfig) -> Result<(), Box<dyn Error>> {
    let store = Arc::new(SqliteStore::open(&config.store.path)?);
    let regions = target_regions(cli, &config)?;
    let backoff = config.store.retry_backoff();

    match &cli.command {
        Command::Seed { hours } => {
            let grid = SyntheticGrid::new(config.synthetic.seed);
            let now = Utc::now().duration_trunc(Duration::hours(1))?;
            let start = now - Duration::hours(i64::from(*hours));
            for region in &regions {
                let (generation, demand) = grid.observations(region, start, *hours);
                let g = retry_once(backoff, "insert generation", || {
                    store.insert_generation(&generation)
                })?;
                let d = retry_once(backoff, "insert demand", || store.insert_demand(&demand))?;
                println!("{region}: {g} generation and {d} demand observations written");
            }
        }
        Command::Detect { days } => {
            let (start, end) = window(*days)?;
            for region in &regions {
                let report = match detect_and_store(store.as_ref(), &config, region, start, end) {
                    Ok(report) => report,
                    Err(CoreError::DataUnavailable(msg)) => {
                        warn!(region = %region, "{msg}");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                let summary =
                    simulate_and_store(store.as_ref(), &config, &report.detection.events)?;
                println!(
                    "{region}: {} events over {} hours",
                    report.detection.events.len(),
                    report.detection.hours_evaluated
                );
                println!("{summary}\n");
            }
        }
        Command::Tick { at } => {
            let engine = DispatchEngine::from_config(Arc::clone(&store), config.clone());
            let report = engine.run_batch(&regions, at.unwrap_or_else(Utc::now));
            print!("{report}");
            if !report.is_clean() {
                return Err(format!("{} region(s) failed", report.failures.len()).into());
            }
        }
        Command::Metrics { days } => {
            let now = Utc::now();
            let region = cli.region.as_deref();
            let metrics = DispatchMetrics::load(store.as_ref(), region, *days, now, backoff)?;
            println!("{metrics}");
        }
        Command::Stats { days } => {
            let (start, end) = window(*days)?;
            for region in &regions {
                let stats =
                    CurtailmentStatistics::load(store.as_ref(), region, start, end, backoff)?;
                println!("{stats}");
            }
        }
        Command::Export { kind, out, days } => {
            let (start, end) = window(*days)?;
            let rows = match kind {
                ExportKind::Dispatch => {
                    let entries = retry_once(backoff, "load dispatch log", || {
                        store.dispatch_log(cli.region.as_deref(), start, end)
                    })?;
                    export_dispatch_log(&entries, out)?;
                    entries.len()
                }
                ExportKind::Events => {
                    let mut events = Vec::new();
                    for region in &regions {
                        events.extend(retry_once(backoff, "load events", || {
                            store.events_between(region, start, end)
                        })?);
                    }
                    export_events(&events, out)?;
                    events.len()
                }
            };
            eprintln!("{rows} rows written to {}", out.display());
        }
        #[cfg(feature = "api")]
        Command::Serve { port } => {
            use std::net::SocketAddr;

            let state = Arc::new(grid_balance::api::AppState {
                engine: DispatchEngine::from_config(Arc::clone(&store), config.clone()),
            });
            let addr = SocketAddr::from(([0, 0, 0, 0], *port));
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(grid_balance::api::serve(state, addr))?;
        }
    }
    Ok(())
}

fn main() {
    init_tracing();

    let cli = match cli::parse_args() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("error: {e}");
            cli::print_usage();
            process::exit(2);
        }
    };

    let config = match load_config(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    if let Err(e) = run(&cli, config) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}
