use anyhow::{Context, Result};
use discovery_client::{Config, DiscoveryClient, Robot};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("discovery_client=info"))
        )
        .init();

    tracing::info!("Starting discovery-client");

    // Config file is optional; without one, browse the default port
    let config = match std::env::args().nth(1) {
        Some(config_path) => {
            let config = Config::load(&config_path)
                .with_context(|| format!("Failed to load config from {}", config_path))?;
            tracing::info!("Loaded config from {}", config_path);
            config
        }
        None => Config::default(),
    };

    let mut client = DiscoveryClient::new(|robots: &[Robot]| {
        match serde_json::to_string(robots) {
            Ok(json) => println!("{}", json),
            Err(e) => tracing::error!("Failed to serialize robot list: {}", e),
        }
    });

    client
        .start(config)
        .await
        .context("Failed to start discovery")?;

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    client
        .shutdown()
        .await
        .context("Failed to shut down discovery")?;

    tracing::info!("Shutdown complete");
    Ok(())
}
