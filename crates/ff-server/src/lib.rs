//! ff-server: HTTP surface and process lifecycle.
//!
//! - Axum API: conversion admission, queue status, SSE events, metrics
//! - Background maintenance of limiter windows and queue jobs
//! - Graceful shutdown via signal handling

pub mod context;
pub mod error;
pub mod middleware;
pub mod router;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;

use ff_convert::{Converter, ToolConverter, ToolRegistry};
use ff_core::config::Config;
use ff_core::SystemClock;

use crate::context::AppContext;

/// Start the fileforge server with the external tool converters.
///
/// Returns when a shutdown signal is received.
pub async fn start(config: Config) -> ff_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let tools = Arc::new(ToolRegistry::discover(&config.tools));
    for info in tools.check_all() {
        if info.available {
            tracing::info!(
                "Tool found: {} ({})",
                info.name,
                info.version.as_deref().unwrap_or("unknown version")
            );
        } else {
            tracing::warn!("Tool not found: {}; its conversions will fail", info.name);
        }
    }

    let timeout = std::time::Duration::from_secs(config.tools.timeout_secs);
    let converter: Arc<dyn Converter> = Arc::new(ToolConverter::new(tools, timeout));

    serve(config, converter, CancellationToken::new()).await
}

/// Run the server with an explicit converter until `cancel` fires or a
/// shutdown signal arrives.
pub async fn serve(
    config: Config,
    converter: Arc<dyn Converter>,
    cancel: CancellationToken,
) -> ff_core::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| ff_core::Error::Internal(format!("Invalid server address: {e}")))?;
    let cleanup_interval = config.maintenance.cleanup_interval();

    let mut ctx = AppContext::new(config, converter, Arc::new(SystemClock));
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => ctx = ctx.with_metrics(handle),
        Err(e) => tracing::warn!("Metrics recorder not installed: {e}"),
    }

    let maintenance = ff_admission::spawn_maintenance(
        ctx.limiter().clone(),
        ctx.queue().clone(),
        cleanup_interval,
        cancel.clone(),
    );

    let app = router::build_router(ctx);

    tracing::info!("Starting server on {addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ff_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .map_err(|e| ff_core::Error::Internal(format!("Server error: {e}")))?;

    // Stop background tasks.
    cancel.cancel();
    let _ = maintenance.await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for SIGINT, SIGTERM, or cancellation.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
}
