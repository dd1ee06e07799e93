//! jt808d - JT/T 808 vehicle terminal gateway
//!
//! Accepts terminal connections over TCP, drives the registration and
//! authentication handshake against the terminal database, and exposes a
//! local control channel for operator commands.

use jt808_server::{Config, Server, TerminalRegistry};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if JT808_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("JT808_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if std::env::var("JT808_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    tracing::info!("Starting jt808d gateway");
    tracing::info!("  Bind address: {}", config.network.bind_addr());
    tracing::info!("  Max terminals: {}", config.network.max_terminals);
    tracing::info!(
        "  Terminal database: {}",
        config.terminals.database_path.display()
    );
    tracing::info!(
        "  Control socket: {}",
        config.control.socket_path.display()
    );

    // Load the terminal database
    let registry = match TerminalRegistry::load(&config.terminals.database_path) {
        Ok(registry) => {
            tracing::info!("  Known terminals: {}", registry.len());
            registry
        }
        Err(e) => {
            tracing::error!("Failed to load terminal database: {}", e);
            return Err(e.into());
        }
    };

    let server = std::sync::Arc::new(Server::bind(config, registry).await?);

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping gateway...");
        shutdown_server.shutdown();
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    tracing::info!("Gateway stopped");
    Ok(())
}
