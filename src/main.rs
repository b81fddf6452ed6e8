// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mikrotik_connector::{
    AppState, Config, ConnectionManager, ConnectionSettings, MetricsRegistry, Result,
    StaticResolver, SupervisorSettings, TcpDialer, create_router, shutdown_signal,
    start_supervisor,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before anything reads the environment
    dotenvy::dotenv().ok();

    setup_tracing();

    let config = Config::from_env();

    tracing::info!(
        "Loaded configuration for {} device(s)",
        config.devices.len()
    );
    for device in &config.devices {
        tracing::info!(
            "  - Device '{}' at {}",
            device.id,
            device.endpoint.socket_addr()
        );
    }

    let metrics = MetricsRegistry::new();

    let settings = ConnectionSettings {
        keepalive_interval: Duration::from_secs(config.keepalive_interval_secs),
        ..ConnectionSettings::default()
    };
    let resolver: StaticResolver = config.endpoints().collect();
    let manager = Arc::new(ConnectionManager::new(
        Arc::new(TcpDialer),
        Arc::new(resolver),
        settings,
        Some(metrics.clone()),
    ));

    let state = Arc::new(AppState {
        config: config.clone(),
        manager: Arc::clone(&manager),
        metrics,
    });

    // Ctrl+C / SIGTERM, registered once for the whole process
    let shutdown_rx = shutdown_signal();

    let supervisor = start_supervisor(
        Arc::clone(&manager),
        SupervisorSettings::from(&config),
        shutdown_rx.clone(),
    );

    let app = create_router(state);

    let addr: SocketAddr = config.server_addr.parse().map_err(|e| {
        tracing::error!("Invalid server address: {}", e);
        e
    })?;

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        tracing::error!("Failed to bind address: {}", e);
        e
    })?;

    tracing::info!("MikroTik Connector starting on {}", addr);
    tracing::info!("Endpoints:");
    tracing::info!("  - GET /health  - Health check");
    tracing::info!("  - GET /stats   - Connection registry snapshot");
    tracing::info!("  - GET /metrics - Prometheus metrics");

    let mut server_shutdown = shutdown_rx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
            tracing::info!("HTTP server shutting down");
        })
        .await
        .map_err(|e| {
            tracing::error!("Server error: {}", e);
            e
        })?;

    match supervisor.await {
        Ok(outcome) => tracing::info!("Supervisor finished: {:?}", outcome),
        Err(e) => tracing::error!("Supervisor task failed: {}", e),
    }

    Ok(())
}

fn setup_tracing() {
    // RUST_LOG wins; "info" when unset
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
