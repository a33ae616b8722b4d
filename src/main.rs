use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use aps_engine::config::EngineConfig;
use aps_engine::error::Error;
use aps_engine::{logger, run_schedule};

/// Incremental scheduling engine for the production line.
#[derive(Parser, Debug)]
#[command(name = "aps_engine", version, about)]
struct Cli {
    /// Wave origin, e.g. "2026-01-22 14:00:00". All planning counts minutes
    /// from this instant.
    #[arg(long = "start-time")]
    start_time: String,

    /// SQLite store holding lots, machines and plan state.
    #[arg(long = "db", default_value = "aps_store.sqlite3")]
    db_path: PathBuf,

    /// Directory receiving the JSON result artifacts.
    #[arg(long = "output-dir", default_value = "PlanResult")]
    output_dir: PathBuf,
}

fn main() -> ExitCode {
    logger::init();

    let cli = Cli::parse();
    let config = match EngineConfig::parse_start_time(&cli.start_time)
        .and_then(|origin| EngineConfig::from_env(origin, cli.db_path, cli.output_dir))
    {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    log::info!("Scheduling start time: {}", cli.start_time);

    match run_schedule(&config) {
        Ok(summary) => {
            if summary.waves_failed > 0 {
                log::warn!("{} of {} wave(s) found no solution.", summary.waves_failed, summary.waves_total);
            }
            if summary.partial_write {
                log::warn!("Run finished as partial success: some writer chunks were rolled back.");
            }
            ExitCode::SUCCESS
        }
        Err(e @ (Error::ConfigError(_) | Error::LoaderError(_) | Error::ModelError(_))) => {
            log::error!("Fatal: {}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
