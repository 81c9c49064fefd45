//! # EngineBridge Server
//!
//! Entry point for the bridge process. Startup sequence:
//!
//! 1. Initialize logging
//! 2. Load configuration (defaults + `EB_*` environment overrides)
//! 3. Validate configuration
//! 4. Construct the container (pool, queue, breaker, retry policy)
//! 5. Run until interrupted, then shut down gracefully
//!
//! The engine connection itself is established lazily on the first
//! dispatched command, so the bridge comes up cleanly even while the engine
//! is still starting.

use anyhow::Result;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use bridge_runtime::config::BridgeConfig;
use bridge_runtime::container::BridgeContainer;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Load and validate configuration
    let config = BridgeConfig::from_env();
    config.validate()?;

    // Construct the container; components are injected from here on
    let container = BridgeContainer::new(config);

    info!(
        endpoint = %container.config().engine.endpoint(),
        "bridge is running. Press Ctrl+C to stop."
    );
    tokio::signal::ctrl_c().await?;

    // Graceful shutdown
    container.shutdown().await;

    Ok(())
}
