//! Forensic Engine - main entry point.

use anyhow::Result;
use forensic_common::config::Config;
use forensic_common::logging::init_logging;
use forensic_engine::{rule_source, ConfigStore, ForensicService};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Load and validate configuration
    let config = Config::load_and_validate()?;

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("Forensic Engine v{}", env!("CARGO_PKG_VERSION"));

    // Invalid rules stop the service before any job can start
    let rules = ConfigStore::load(rule_source(&config)).map_err(|e| {
        tracing::error!(error = %e, "Rule configuration rejected");
        anyhow::anyhow!(e)
    })?;

    let service = ForensicService::new(config, Arc::new(rules))?;
    service.start().await
}
