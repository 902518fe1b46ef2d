//! posmon - entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Live position monitor for Binance and Bitget futures.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via POSMON_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before any TLS connection.
    posmon_ws::init_crypto();

    let args = Args::parse();

    posmon_telemetry::init_logging()?;

    info!("Starting posmon v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > POSMON_CONFIG > default
    let config_path = args
        .config
        .or_else(|| std::env::var("POSMON_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = posmon_app::AppConfig::from_file(&config_path)?;

    let app = posmon_app::Application::new(config)?;
    app.run().await?;

    Ok(())
}
