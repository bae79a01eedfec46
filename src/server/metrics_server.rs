// src/server/metrics_server.rs

use super::transport::TcpTransportLayer;
use crate::connection::{ConnectionRegistry, active_workers};
use crate::core::executor::ServiceExecutor;
use crate::core::metrics::{self, gather_metrics};
use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// The server components whose live counts are sampled on every scrape.
#[derive(Clone)]
pub struct MetricsSources {
    pub registry: Arc<ConnectionRegistry>,
    pub transport: Arc<TcpTransportLayer>,
    pub executor: Option<Arc<dyn ServiceExecutor>>,
}

/// Handles HTTP requests to the /metrics endpoint.
///
/// It refreshes the connection gauges before gathering all registered metrics
/// and encoding them in the Prometheus text format.
async fn metrics_handler(sources: MetricsSources) -> impl IntoResponse {
    metrics::CONNECTED_CLIENTS.set(sources.transport.open_sessions() as f64);
    metrics::REGISTERED_SESSIONS.set(sources.registry.number_of_connections() as f64);
    metrics::ACTIVE_WORKERS.set(active_workers() as f64);
    if let Some(executor) = &sources.executor {
        metrics::EXECUTOR_OUTSTANDING_TASKS.set(executor.stats().outstanding_tasks as f64);
    }

    let body = gather_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

/// Runs a simple HTTP server to expose Prometheus metrics on /metrics.
pub async fn run_metrics_server(
    sources: MetricsSources,
    port: u16,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = Router::new().route("/metrics", get(move || metrics_handler(sources.clone())));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(
        "Prometheus metrics server listening on http://{}/metrics",
        addr
    );

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind metrics server on port {}: {}", port, e);
            return Ok(());
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("Metrics server shutting down.");
        })
        .await?;
    Ok(())
}
