//! Composition root binary: installs logging, builds the wired
//! [`mr_platform::PlatformContext`] from [`mr_config::AppConfig`], and runs
//! until interrupted.

use mr_config::AppConfig;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_logging() {
    let filter = EnvFilter::try_from_env("RUST_LOG")
        .or_else(|_| EnvFilter::try_new(std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string())))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry().with(filter).with(fmt::layer()).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let config = AppConfig::new();
    let validation = mr_config::validate_config(&config);
    if !validation.is_valid {
        for error in &validation.errors {
            error!(field = %error.field, message = %error.message, "configuration validation error");
        }
        return Err(anyhow::anyhow!("configuration failed validation"));
    }

    info!(environment = %config.app.environment, "starting message routing fabric");
    let platform = mr_platform::build(config).await?;
    info!(distributed = platform.router.is_distributed(), "routing fabric is live");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    platform.shutdown();

    Ok(())
}
