use agenda::api_server::start_api_server;
use agenda::cli::{Cli, Commands};
use agenda::{Config, env_manager, run_risk_analysis};
use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with custom format
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use chrono::Local;
            use std::io::Write;
            writeln!(
                buf,
                "{} [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    env_manager::load_env_file();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    let missing = env_manager::missing_env_vars();
    if !missing.is_empty() {
        warn!("Some features will be unavailable until these are set: {}", missing.join(", "));
    }

    match cli.command.unwrap_or(Commands::Serve { bind: None }) {
        Commands::Serve { bind } => {
            info!("Starting Agenda API server");
            start_api_server(config, bind).await
        }
        Commands::AnalyzeRisk => match run_risk_analysis(config).await {
            Ok(report) => {
                info!(
                    "Nightly analysis complete: {} processed, {} alerts, {} skipped",
                    report.processed, report.alerts_generated, report.skipped
                );
                Ok(())
            }
            Err(e) => {
                error!("Nightly risk analysis failed: {:#}", e);
                Err(e)
            }
        },
    }
}
