// src/connection/transport.rs

use super::session::Session;

/// Counts of sessions tracked by a transport layer or the connection registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Sessions currently open.
    pub current: usize,
    /// Sessions created since startup.
    pub created: u64,
    /// How many more sessions may be opened before the limit is reached.
    pub available: usize,
}

/// The layer that owns the sockets behind sessions.
pub trait TransportLayer: Send + Sync {
    /// Notifies the transport that `session` has been discarded. A session calls
    /// this at most once, from its destructor.
    fn end(&self, session: &Session);

    fn session_stats(&self) -> SessionStats;
}
