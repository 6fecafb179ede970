//! LKE driver - serves the driver operations to its host over HTTP

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lke_driver::config::DriverConfig;
use lke_driver::controller::Driver;
use lke_driver::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = DriverConfig::parse();
    let addr = SocketAddr::new(config.bind_address, config.port);

    let driver = Arc::new(Driver::from_config(&config));
    let shutdown = CancellationToken::new();
    let app = server::router(driver, shutdown.clone());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;
    tracing::info!(%addr, linode_url = %config.linode_url, "LKE driver listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    tracing::info!("LKE driver stopped");
    Ok(())
}

/// Resolves on Ctrl-C after cancelling every in-flight wait
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested, cancelling in-flight operations");
    shutdown.cancel();
}
