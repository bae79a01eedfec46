// src/server/transport.rs

//! The TCP transport layer: admission against `max_clients` and the open
//! connection count that backs `spindle_connected_clients`.

use crate::connection::{HostAndPort, Session, SessionStats, TransportLayer};
use crate::core::metrics;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::debug;

/// Owns the accounting for every socket accepted by the listener.
///
/// A slot is taken when a session is opened and released when that session is
/// discarded, which happens after its driver has ended and been dropped.
pub struct TcpTransportLayer {
    open: AtomicUsize,
    created: AtomicU64,
    max_clients: usize,
}

impl TcpTransportLayer {
    pub fn new(max_clients: usize) -> Self {
        Self {
            open: AtomicUsize::new(0),
            created: AtomicU64::new(0),
            max_clients,
        }
    }

    /// Opens a session for an accepted socket, or returns `None` if the server
    /// already holds `max_clients` connections.
    pub fn try_open_session(
        self: &Arc<Self>,
        remote: SocketAddr,
        local: SocketAddr,
    ) -> Option<Session> {
        self.open
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |open| {
                (open < self.max_clients).then_some(open + 1)
            })
            .ok()?;
        self.created.fetch_add(1, Ordering::Relaxed);
        metrics::CONNECTED_CLIENTS.inc();

        Some(Session::attached(
            HostAndPort::from(remote),
            HostAndPort::from(local),
            self,
        ))
    }

    pub fn open_sessions(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }
}

impl TransportLayer for TcpTransportLayer {
    fn end(&self, session: &Session) {
        self.open.fetch_sub(1, Ordering::AcqRel);
        metrics::CONNECTED_CLIENTS.dec();
        debug!(
            "Transport released connection {} from {}.",
            session.id(),
            session.remote()
        );
    }

    fn session_stats(&self) -> SessionStats {
        let current = self.open_sessions();
        SessionStats {
            current,
            created: self.created.load(Ordering::Relaxed),
            available: self.max_clients.saturating_sub(current),
        }
    }
}
