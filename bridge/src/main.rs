use anyhow::{Context, Result};
use bridge::{create_router, Bridge};
use replicator::load_config;
use replicator::nats::NatsDialer;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bridge=info,replicator=info".into()),
        )
        .init();

    info!("NATS replicator starting...");

    let config_path =
        std::env::var("REPLICATOR_CONFIG").unwrap_or_else(|_| "replicator.toml".to_string());
    let config = load_config(&config_path)?;

    info!(
        config = %config_path,
        nats = config.nats.len(),
        stream = config.stream.len(),
        connectors = config.connect.len(),
        reconnect_interval_ms = config.reconnect_interval_ms,
        "Configuration loaded"
    );

    let monitoring = config.monitoring.clone();
    let bridge = Arc::new(Bridge::new(config, Arc::new(NatsDialer)));
    let running = bridge.start().await?;
    info!(connectors_running = running, "Bridge running");

    // Monitoring API (port 0 disables it)
    let server_handle = if monitoring.http_port != 0 {
        let addr = format!("{}:{}", monitoring.http_host, monitoring.http_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind monitoring address {}", addr))?;
        info!(addr = %addr, "Monitoring API listening");

        let router = create_router(Arc::clone(&bridge));
        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(error = %e, "Monitoring API server error");
            }
        }))
    } else {
        None
    };

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    if let Some(handle) = server_handle {
        handle.abort();
    }
    bridge.stop().await;
    info!("NATS replicator stopped");

    Ok(())
}
