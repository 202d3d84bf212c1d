use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Agenda - request handlers and nightly jobs for the student agenda
#[derive(Debug, Parser)]
#[command(name = "agenda")]
#[command(about = "Schedule import, student profile classification and nightly risk alerts", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Command to execute (defaults to `serve`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Address to listen on, e.g. 0.0.0.0:8080
        #[arg(long)]
        bind: Option<String>,
    },

    /// Score every onboarded user and write risk alerts, then exit
    #[command(alias = "risk")]
    AnalyzeRisk,
}
