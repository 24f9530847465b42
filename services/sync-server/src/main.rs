//! semsync sync server
//!
//! Resizes workflow semaphores stored in a ConfigMap and wakes every
//! workflow parked on the resized semaphore.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use semsync_server::{api, cluster::KubeConnector, config, state::AppState};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to SEMSYNC_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting semsync sync server");
    info!(
        listen_addr = %config.listen_addr,
        in_cluster = config.in_cluster,
        "Configuration loaded"
    );

    let connector = KubeConnector::new(config.in_cluster, config.kubeconfig.clone());
    let state = AppState::new(Arc::new(connector), config.defaults.clone());

    // A failed first connect is not fatal: /set_config can retry it.
    if let Err(e) = state.connect() {
        warn!(error = %e, "Cluster connection not established at startup");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    // Spawn the server with graceful shutdown
    let mut server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    // Wait for shutdown signal (Ctrl+C)
    let interrupted = tokio::select! {
        _ = tokio::signal::ctrl_c() => true,
        result = &mut server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
            false
        }
    };

    if interrupted {
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);

        let shutdown_timeout = Duration::from_secs(10);
        if tokio::time::timeout(shutdown_timeout, server_handle).await.is_err() {
            warn!("HTTP server did not shut down in time");
        }
    }

    info!("Sync server shutdown complete");
    Ok(())
}
