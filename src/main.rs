//! Upwatch Server
//!
//! Run with: cargo run
//!
//! Configuration comes from environment variables, see [`upwatch::config`].
//! The most relevant ones:
//! - UPWATCH_PORT: Port number (default: 4001)
//! - UPWATCH_SERVICES_FILE: JSON array of services to monitor
//! - DATABASE_URL: Postgres store (requires the `postgres` feature)
//! - RUST_LOG: Log level (default: info)

use upwatch::api::run_server;
use upwatch::config::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "upwatch=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    tracing::info!("Upwatch configuration:");
    tracing::info!("  Listen: {}", config.bind_addr());
    tracing::info!("  Tick: {:?}", config.tick);
    tracing::info!("  Fallback interval: {:?}", config.fallback_interval);
    tracing::info!("  Default timeout: {:?}", config.default_timeout);
    tracing::info!(
        "  Live feed: queue {} / subscriber buffer {}",
        config.hub_capacity,
        config.subscriber_buffer
    );
    match &config.services_file {
        Some(path) => tracing::info!("  Services file: {}", path.display()),
        None => tracing::info!("  Services file: (none)"),
    }
    if config.database_url.is_some() {
        tracing::info!("  Database: configured");
    }

    println!("upwatch {}", env!("CARGO_PKG_VERSION"));

    run_server(config).await
}
