// src/server/spawner.rs

//! Spawns the server's long-running background tasks.

use super::context::ServerContext;
use super::metrics_server::{self, MetricsSources};
use anyhow::Result;
use tracing::info;

/// Spawns all background tasks into the context's JoinSet.
pub fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    // --- Metrics Server ---
    if ctx.config.metrics.enabled {
        let sources = MetricsSources {
            registry: ctx.registry.clone(),
            transport: ctx.transport.clone(),
            executor: ctx.executor.clone(),
        };
        let port = ctx.config.metrics.port;
        let shutdown_rx_metrics = ctx.shutdown_tx.subscribe();
        ctx.background_tasks.spawn(async move {
            metrics_server::run_metrics_server(sources, port, shutdown_rx_metrics).await
        });
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }

    info!("All background tasks have been spawned.");
    Ok(())
}
