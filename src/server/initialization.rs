// src/server/initialization.rs

//! Handles server initialization: TLS, the service executor, the connection
//! registry and the listening socket.

use super::context::ServerContext;
use super::transport::TcpTransportLayer;
use crate::config::{Config, ExecutorKind};
use crate::connection::{ConnectionRegistry, ServiceContext};
use crate::core::executor::{FixedServiceExecutor, ServiceExecutor};
use crate::core::handler::{EchoHandler, RequestHandler};
use anyhow::{Context, Result, anyhow};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_rustls::{TlsAcceptor, rustls};
use tracing::{info, warn};

/// Initializes all server components before starting the main loop.
pub async fn setup(config: Config) -> Result<ServerContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    let acceptor = setup_tls(&config).await?;
    let executor = setup_executor(&config)?;

    let handler: Arc<dyn RequestHandler> = Arc::new(EchoHandler);
    let service_context = Arc::new(ServiceContext::from_config(
        &config,
        handler,
        executor.clone(),
    ));
    let registry = Arc::new(ConnectionRegistry::new(service_context));
    let transport = Arc::new(TcpTransportLayer::new(config.max_clients));
    info!(
        "Connection registry initialized ({} execution).",
        if registry.is_synchronous() {
            "dedicated worker"
        } else {
            "executor scheduled"
        }
    );

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;
    info!("Spindle server listening on {}:{}", config.host, config.port);

    Ok(ServerContext {
        config,
        registry,
        transport,
        executor,
        listener,
        shutdown_tx,
        background_tasks: JoinSet::new(),
        acceptor,
    })
}

/// Builds and starts the service executor if one is configured.
fn setup_executor(config: &Config) -> Result<Option<Arc<dyn ServiceExecutor>>> {
    match config.executor.kind {
        ExecutorKind::Dedicated => Ok(None),
        ExecutorKind::Fixed => {
            let executor = FixedServiceExecutor::new(config.executor.resolved_threads());
            executor
                .start()
                .map_err(|e| anyhow!("Failed to start service executor: {}", e))?;
            Ok(Some(Arc::new(executor)))
        }
    }
}

/// Sets up the TLS acceptor if TLS is enabled in the configuration.
async fn setup_tls(config: &Config) -> Result<Option<TlsAcceptor>> {
    if config.tls.enabled {
        info!("TLS is enabled. Loading certificate and key.");
        let certs = load_certs(&config.tls.cert_path)?;
        let key = load_key(&config.tls.key_path)?;
        let server_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        Ok(Some(TlsAcceptor::from(Arc::new(server_config))))
    } else {
        Ok(None)
    }
}

/// Loads TLS certificates from a PEM file.
fn load_certs(path: &str) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let cert_file = File::open(path)
        .map_err(|e| anyhow!("Failed to open certificate file '{}': {}", path, e))?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(anyhow!("No certificates found in '{}'", path));
    }
    Ok(certs)
}

/// Loads a private key from a PEM file.
fn load_key(path: &str) -> Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let key_file = File::open(path)
        .map_err(|e| anyhow!("Failed to open private key file '{}': {}", path, e))?;
    let mut key_reader = BufReader::new(key_file);
    rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| anyhow!("No private key found in key file '{}'", path))
}

/// Logs key configuration parameters at startup.
fn log_startup_info(config: &Config) {
    info!(
        "Accepting up to {} concurrent connections, messages up to {} bytes.",
        config.max_clients, config.max_message_size
    );
    match config.executor.kind {
        ExecutorKind::Dedicated => info!("Connections run on dedicated workers."),
        ExecutorKind::Fixed => info!(
            "Connections are scheduled on a fixed executor with {} workers.",
            config.executor.resolved_threads()
        ),
    }
    if config.quiet {
        warn!("Quiet mode: per-connection open/close logging is disabled.");
    }
}
