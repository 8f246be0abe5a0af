//! mdsync - multi-provider market-data ingestion, entry point.

use anyhow::Result;
use clap::Parser;
use mdsync_cli::{AppConfig, Application, Cli};
use std::process::ExitCode;
use tracing::{error, info, warn};

/// Exit status when the run finished but some symbols failed.
const EXIT_PARTIAL_FAILURE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Run aborted");
            eprintln!("mdsync: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    // Determine config path: CLI arg > MDSYNC_CONFIG env var > default
    let config_path = AppConfig::resolve_path(cli.config.as_deref());
    let found = config_path.exists();
    let config = if found {
        AppConfig::from_file(&config_path)?
    } else {
        AppConfig::default()
    };

    mdsync_telemetry::init_logging(&config.telemetry.log_level)?;
    info!("Starting mdsync v{}", env!("CARGO_PKG_VERSION"));
    if found {
        info!(config_path = %config_path.display(), "Configuration loaded");
    } else {
        warn!(config_path = %config_path.display(), "Config file not found, using defaults");
    }

    let app = Application::new(config, cli.dry_run)?;
    let report = app.run(&cli.command).await?;

    if report.has_failures() {
        warn!(failed = report.totals.failed, "Run finished with failed symbols");
        Ok(ExitCode::from(EXIT_PARTIAL_FAILURE))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
