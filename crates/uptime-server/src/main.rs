//! Uptime server binary

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use uptime_server::{Config, UptimeServer, setup_tracing};

#[derive(Parser)]
#[command(author, version, about = "Uptime monitoring server")]
struct Cli {
    /// Configuration file, searched in the default locations when omitted
    #[arg(short, long, env = "UPTIME_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Tracing is not set up yet, configuration errors go to stderr
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    let _telemetry_guard = setup_tracing(&config.telemetry, &config.logging)?;

    tracing::info!("Uptime server starting");

    let server = UptimeServer::from_config(&config).await;
    server.run().await?;

    // Telemetry guard will flush spans on drop

    Ok(())
}
