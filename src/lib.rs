pub mod api_server;
pub mod auth;
pub mod cli;
pub mod config;
pub mod env_manager;
pub mod extraction;
pub mod gcp;
pub mod profile;
pub mod resources;
pub mod risk;
pub mod schedule;
pub mod store;

use anyhow::Result;
use log::info;

/// One nightly risk pass with the configured store and regression model
pub async fn run_risk_analysis(config: Config) -> Result<risk::RiskReport> {
    let threshold = config.risk.threshold;
    let resources = resources::Resources::new(config)?;
    let store = resources.store().await?;
    let scorer = resources.risk_scorer().await?;
    info!("Running risk analysis with threshold {}", threshold);
    risk::RiskAnalyzer::new(store, scorer, threshold).run().await
}

// Re-export commonly used types
pub use config::Config;
pub use schedule::{ImportError, ImportSummary, ScheduleImporter};
