use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use sheetsync::config::SyncConfig;
use sheetsync::runner::{SyncError, SyncRunner};
use sheetsync::service::SmartsheetService;
use sheetsync::sync::report::RunStatistics;
use sheetsync::{logging, shutdown};
use smartsheet_core::SmartsheetClient;

const CONFIG_ERROR_EXIT_CODE: u8 = 2;

/// Copies FILE attachments from source sheet rows to the target sheet rows
/// with the same match-column value.
#[derive(Debug, Parser)]
#[command(name = "sheetsync", version)]
struct Cli {
    /// Plan and report without downloading or uploading anything
    #[arg(long)]
    dry_run: bool,

    /// Print the run summary as one JSON object on stdout
    #[arg(long)]
    json: bool,

    /// Debug level logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = match SyncConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("{err}");
            return ExitCode::from(CONFIG_ERROR_EXIT_CODE);
        }
    };

    match run(&cli, config).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli, config: SyncConfig) -> anyhow::Result<ExitCode> {
    config.log_summary();
    let fail_on_errors = config.fail_on_errors;
    let client = SmartsheetClient::with_timeouts(
        &config.base_url,
        config.api_token.clone(),
        config.http_timeouts,
    )
    .context("failed to create Smartsheet client")?;
    let runner = SyncRunner::new(SmartsheetService::new(client), config);
    let cancel = shutdown::install_signal_handler().context("failed to install signal handler")?;

    let stats = match runner.run(cli.dry_run, &cancel).await {
        Ok(stats) => stats,
        Err(SyncError::Interrupted { sheet_id }) => {
            tracing::warn!("interrupted while loading sheet {sheet_id}");
            return Ok(ExitCode::from(shutdown::INTERRUPTED_EXIT_CODE));
        }
        Err(err) => return Err(err.into()),
    };

    if cli.json {
        println!("{}", serde_json::to_string(&stats)?);
    }
    Ok(exit_code(&stats, fail_on_errors))
}

fn exit_code(stats: &RunStatistics, fail_on_errors: bool) -> ExitCode {
    if stats.interrupted {
        ExitCode::from(shutdown::INTERRUPTED_EXIT_CODE)
    } else if fail_on_errors && stats.errors > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
