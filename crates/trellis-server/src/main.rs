use anyhow::{Context, Result};

use trellis_monitoring::MonitoringConfig;
use trellis_server::ServerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Development convenience; absent files are fine
    dotenvy::dotenv().ok();

    let environment = std::env::var("NODE_ENV").unwrap_or_else(|_| "development".to_string());
    let monitoring_config = MonitoringConfig {
        service_name: "trellis-server".to_string(),
        log_filter: std::env::var("LOG_FILTER")
            .unwrap_or_else(|_| "info,trellis=debug".to_string()),
        enable_json_logging: environment == "production",
    };
    trellis_monitoring::init(monitoring_config).context("failed to initialize monitoring")?;

    let config = ServerConfig::load().context("failed to load configuration")?;

    trellis_server::run(config).await.context("server error")?;

    Ok(())
}
