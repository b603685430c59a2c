//! dr-server: job service, HTTP API and background cleanup.
//!
//! This crate ties the job model and conversion engines together into a
//! running service. It provides:
//!
//! - [`store::JobStore`], the in-memory job table
//! - [`pool::WorkerPool`], the bounded FIFO executor for conversions
//! - [`delivery::DeliveryClient`], callback upload with retry and backoff
//! - [`reaper::Reaper`], age-based expiry of jobs and their files
//! - [`service::JobService`], the lifecycle orchestrator over all of the above
//! - An Axum HTTP API and graceful shutdown via signal handling

pub mod artifacts;
pub mod context;
pub mod delivery;
pub mod error;
pub mod pool;
pub mod reaper;
pub mod router;
pub mod routes;
pub mod service;
pub mod store;

use std::net::SocketAddr;

use dr_core::config::Config;
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;
use crate::service::JobService;

/// Start the docrelay server.
///
/// Builds the [`JobService`], spawns the reaper and serves the HTTP API until
/// a shutdown signal is received or `cancel` is triggered. On the way out the
/// worker pool is stopped and the reaper makes a final cleanup pass.
pub async fn start(config: Config, cancel: CancellationToken) -> dr_core::Result<()> {
    for warning in config.warnings() {
        tracing::warn!("Config warning: {warning}");
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| dr_core::Error::Config(format!("Invalid server address: {e}")))?;
    let cleanup_interval = config.cleanup.interval();

    let service = JobService::builder(config).build().await?;
    tracing::info!(
        artifact_dir = %service.config().conversion.artifact_dir.display(),
        workers = service.config().conversion.max_workers,
        engines = ?service.available_engines(),
        "Job service ready"
    );

    let reaper = service.reaper();
    let reaper_cancel = cancel.child_token();
    let reaper_handle = {
        let reaper_cancel = reaper_cancel.clone();
        tokio::spawn(async move {
            reaper.run(cleanup_interval, reaper_cancel).await;
        })
    };

    let app = router::build_router(AppContext::new(service.clone()));

    tracing::info!("Starting server on {addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| dr_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await;
    if let Err(ref e) = served {
        tracing::error!("HTTP server error: {e}");
    }

    // Stop conversions first so the reaper's final pass sees settled jobs.
    service.shutdown().await;
    reaper_cancel.cancel();
    let _ = reaper_handle.await;

    tracing::info!("Server shutdown complete");
    served.map_err(dr_core::Error::from)
}

/// Wait for SIGINT, SIGTERM or cancellation.
pub async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {e}");
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
