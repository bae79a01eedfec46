// src/connection/registry.rs

//! Defines `ConnectionRegistry`, the process-wide table of live connection drivers.

use super::context::ServiceContext;
use super::handler::ConnectionHandler;
use super::launcher::{SessionLauncher, launcher_for};
use super::restriction::RestrictionEnvironment;
use super::session::{Session, SessionId, TagMask};
use super::transport::SessionStats;
use crate::core::metrics;
use crate::core::protocol::BoxMessageStream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How often `shutdown` re-checks the number of open sessions.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How often `shutdown` reports sessions that are still draining.
const DRAIN_LOG_INTERVAL: Duration = Duration::from_secs(1);

type SessionMap = HashMap<SessionId, Arc<ConnectionHandler>>;

/// Tracks every driver that has been started and has not yet ended.
///
/// Membership changes are linearized by a single lock: insertion happens in
/// `start_session`, removal only through the driver's own cleanup hook, and bulk
/// termination works on a snapshot taken under the same lock. The lock is never
/// held while calling into a driver's execution.
pub struct ConnectionRegistry {
    context: Arc<ServiceContext>,
    launcher: Box<dyn SessionLauncher>,
    sessions: Arc<Mutex<SessionMap>>,
    total_created: AtomicU64,
}

impl ConnectionRegistry {
    /// Creates a registry whose execution strategy follows `context`.
    pub fn new(context: Arc<ServiceContext>) -> Self {
        let launcher = launcher_for(&context);
        Self::with_launcher(context, launcher)
    }

    pub fn with_launcher(context: Arc<ServiceContext>, launcher: Box<dyn SessionLauncher>) -> Self {
        Self {
            context,
            launcher,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            total_created: AtomicU64::new(0),
        }
    }

    pub fn is_synchronous(&self) -> bool {
        self.launcher.is_synchronous()
    }

    /// Wraps `session` in a driver, registers it and starts executing it.
    ///
    /// # Panics
    ///
    /// Panics if the session's remote or local address is not a resolved socket
    /// address. The transport layer guarantees both before handing a session over.
    pub fn start_session(&self, session: Session, stream: BoxMessageStream) {
        let (Some(remote_addr), Some(local_addr)) =
            (session.remote().sock_addr(), session.local().sock_addr())
        else {
            panic!(
                "invariant failure: session {} reached start_session without resolved socket addresses (remote: {}, local: {})",
                session.id(),
                session.remote(),
                session.local()
            );
        };
        session.set_restriction_environment(Arc::new(RestrictionEnvironment::new(
            remote_addr,
            local_addr,
        )));

        let session_id = session.id();
        let handler = ConnectionHandler::create(
            Arc::clone(&self.context),
            session,
            stream,
            self.launcher.is_synchronous(),
        );

        {
            let mut sessions = self.sessions.lock();
            sessions.insert(session_id, Arc::clone(&handler));
            metrics::REGISTERED_SESSIONS.set(sessions.len() as f64);
        }
        self.total_created.fetch_add(1, Ordering::Relaxed);

        let sessions = Arc::downgrade(&self.sessions);
        let quiet = self.context.quiet;
        handler.set_cleanup_hook(Box::new(move || {
            let Some(sessions) = sessions.upgrade() else {
                return;
            };
            let (removed, connection_count) = {
                let mut sessions = sessions.lock();
                let removed = sessions.remove(&session_id);
                metrics::REGISTERED_SESSIONS.set(sessions.len() as f64);
                (removed, sessions.len())
            };

            if !quiet && let Some(handler) = &removed {
                info!(
                    "end connection {} ({} connection{} now open)",
                    handler.session().remote(),
                    connection_count,
                    if connection_count == 1 { "" } else { "s" }
                );
            }
            // The last reference may go here; release it outside the lock.
            drop(removed);
        }));

        self.launcher.launch(handler);
    }

    /// Terminates every session whose tags do not intersect `tags`.
    ///
    /// Returns without waiting for the sessions to end; callers that need to
    /// drain poll `number_of_connections`.
    pub fn end_all_sessions(&self, tags: TagMask) {
        // Owning references keep each driver alive until `terminate` has been
        // called, even if it ends on its own in the meantime.
        let to_end: Vec<Arc<ConnectionHandler>> = {
            let sessions = self.sessions.lock();
            sessions
                .values()
                .filter(|handler| {
                    let session = handler.session();
                    if session.tags().intersects(tags) {
                        info!("Skip closing connection for connection # {}", session.id());
                        false
                    } else {
                        true
                    }
                })
                .cloned()
                .collect()
        };

        debug!("Ending {} sessions.", to_end.len());
        for handler in &to_end {
            handler.terminate();
        }
    }

    /// Terminates every session and waits up to `timeout` for all of them to end.
    ///
    /// Returns true if the registry drained in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.end_all_sessions(TagMask::empty());

        let deadline = Instant::now() + timeout;
        let mut next_log = Instant::now() + DRAIN_LOG_INTERVAL;
        loop {
            let remaining = self.number_of_connections();
            if remaining == 0 {
                info!("All sessions ended.");
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "Shutdown timed out with {} sessions still open after {:?}.",
                    remaining, timeout
                );
                return false;
            }
            if now >= next_log {
                info!("Shutdown: still waiting on {} active sessions to drain.", remaining);
                next_log = now + DRAIN_LOG_INTERVAL;
            }

            tokio::time::sleep(DRAIN_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    /// The number of registered drivers that have not yet ended.
    pub fn number_of_connections(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn session_stats(&self) -> SessionStats {
        let current = self.number_of_connections();
        SessionStats {
            current,
            created: self.total_created.load(Ordering::Relaxed),
            available: self.context.max_clients.saturating_sub(current),
        }
    }
}

impl Drop for ConnectionRegistry {
    /// Terminates any session still tracked so that no driver outlives the
    /// registry waiting on a connection nobody will close.
    fn drop(&mut self) {
        let remaining = self.number_of_connections();
        if remaining > 0 {
            debug!(
                "Connection registry dropped with {} live sessions, terminating them.",
                remaining
            );
            self.end_all_sessions(TagMask::empty());
        }
    }
}
