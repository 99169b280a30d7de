//! consul-catalog binary entry point.

use clap::Parser;
use consul_catalog::{telemetry, CatalogWatcher, Config};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Keep a DNS-facing snapshot of Consul services in sync.
#[derive(Parser, Debug)]
#[command(name = "consul-catalog")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "consul-catalog.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.clone()))
        .add_source(
            config::Environment::with_prefix("CONSUL_CATALOG")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = %args.config.display(),
        endpoint = %config.consul.endpoint,
        config_key = %config.sync.config_key,
        "Starting consul-catalog"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    let watcher = CatalogWatcher::new(config);
    let result = watcher.run(shutdown).await;

    if let Err(e) = result {
        error!("Watcher error: {}", e);
        return Err(e.into());
    }

    info!("consul-catalog shutdown complete");
    Ok(())
}
