// src/server/connection_loop.rs

//! Contains the main server loop for accepting connections and handling graceful shutdown.

use super::context::ServerContext;
use super::stream::AnyStream;
use crate::connection::{ConnectionRegistry, Session};
use crate::core::metrics;
use crate::core::protocol::{BoxMessageStream, MessageCodec};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

/// The main server loop that accepts connections and handles graceful shutdown.
pub async fn run(mut ctx: ServerContext) -> Result<()> {
    let mut handshake_tasks = JoinSet::new();

    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;

    loop {
        tokio::select! {
            biased;

            _ = sigint.recv() => {
                info!("SIGINT received, initiating graceful shutdown.");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, initiating graceful shutdown.");
                break;
            }

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            },

            res = ctx.listener.accept() => {
                match res {
                    Ok((socket, addr)) => accept_connection(&ctx, &mut handshake_tasks, socket, addr),
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            },

            Some(res) = handshake_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A connection setup task panicked: {e:?}");
                }
            },
        }
    }

    info!("Shutting down. Sending signal to all tasks.");
    if ctx.shutdown_tx.send(()).is_err() {
        debug!("No background task is listening for the shutdown signal.");
    }

    handshake_tasks.shutdown().await;

    let timeout = Duration::from_secs(ctx.config.shutdown_timeout_secs);
    if ctx.registry.shutdown(timeout).await {
        info!("All client connections closed.");
    } else {
        warn!(
            "{} client connections were still open when the shutdown timeout expired.",
            ctx.registry.number_of_connections()
        );
    }

    if let Some(executor) = &ctx.executor {
        info!("Shutting down the {} service executor.", executor.name());
        if let Err(e) = executor.shutdown(timeout).await {
            warn!("Service executor did not shut down cleanly: {}", e);
        }
    }

    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(Duration::from_secs(10), async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    };
    info!("Server shutdown complete.");
    Ok(())
}

/// Admits an accepted socket and hands it to the connection registry, going
/// through a TLS handshake first when TLS is enabled.
fn accept_connection(
    ctx: &ServerContext,
    handshake_tasks: &mut JoinSet<()>,
    socket: TcpStream,
    addr: SocketAddr,
) {
    metrics::CONNECTIONS_RECEIVED_TOTAL.inc();

    let local = match socket.local_addr() {
        Ok(local) => local,
        Err(e) => {
            warn!("Dropping connection from {}: no local address: {}", addr, e);
            return;
        }
    };

    let Some(session) = ctx.transport.try_open_session(addr, local) else {
        metrics::CONNECTIONS_REJECTED_TOTAL.inc();
        info!(
            "connection refused because too many open connections: {} (from {})",
            ctx.transport.max_clients(),
            addr
        );
        return;
    };

    if !ctx.config.quiet {
        let open = ctx.transport.open_sessions();
        info!(
            "connection accepted from {} #{} ({} connection{} now open)",
            addr,
            session.id(),
            open,
            if open == 1 { "" } else { "s" }
        );
    }

    if let Err(e) = socket.set_nodelay(true) {
        debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
    }

    let max_message_size = ctx.config.max_message_size;
    match ctx.acceptor.clone() {
        Some(acceptor) => {
            let registry = ctx.registry.clone();
            handshake_tasks.spawn(async move {
                match acceptor.accept(socket).await {
                    Ok(tls_stream) => {
                        info!("TLS handshake successful for {addr}");
                        let stream = AnyStream::Tls(Box::new(tls_stream));
                        start(&registry, session, stream, max_message_size);
                    }
                    // Dropping the session here releases its transport slot.
                    Err(e) => warn!("TLS handshake error for {addr}: {e}"),
                }
            });
        }
        None => start(
            &ctx.registry,
            session,
            AnyStream::Tcp(socket),
            max_message_size,
        ),
    }
}

fn start(
    registry: &ConnectionRegistry,
    session: Session,
    stream: AnyStream,
    max_message_size: usize,
) {
    debug!("Starting session {} over {}.", session.id(), stream.kind());
    let framed: BoxMessageStream = Box::new(Framed::new(stream, MessageCodec::new(max_message_size)));
    registry.start_session(session, framed);
}
