mod cli;
mod commands;
mod config;

use anyhow::{Context, Result};
use casesync_api::RunStatus;
use clap::Parser;
use std::fs::OpenOptions;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command};
use config::{CliConfig, ConfigOverrides};

/// Logs go to `log_file` when given (no ANSI colors), otherwise stderr.
/// `RUST_LOG` overrides the default filter.
fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    let (file_layer, stderr_layer) = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            (
                Some(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false)),
                None,
            )
        }
        None => (None, Some(fmt::layer().with_writer(std::io::stderr))),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = CliConfig::load(cli.config.as_deref())?;
    config.apply_overrides(&ConfigOverrides::from(&cli));
    init_logging(config.log_file.as_deref())?;

    match cli.command {
        Command::Sync {
            scope,
            triggered_by,
        } => {
            let run = commands::run_sync(&config, scope.into(), triggered_by).await?;
            print!("{}", commands::format_run(&run));
            Ok(if run.status == RunStatus::Success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Status { json } => {
            let report = commands::status(&config).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", commands::format_status(&report));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Health { json } => {
            let report = commands::health(&config).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", commands::format_health(&report));
            }
            Ok(if report.healthy {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
