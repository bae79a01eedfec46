// src/server/context.rs

use super::transport::TcpTransportLayer;
use crate::config::Config;
use crate::connection::ConnectionRegistry;
use crate::core::executor::ServiceExecutor;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;

/// Holds all the initialized state required to run the server's main loop.
pub struct ServerContext {
    pub config: Config,
    pub registry: Arc<ConnectionRegistry>,
    pub transport: Arc<TcpTransportLayer>,
    pub executor: Option<Arc<dyn ServiceExecutor>>,
    pub listener: TcpListener,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<Result<(), anyhow::Error>>,
    pub acceptor: Option<TlsAcceptor>,
}
