// src/connection/guard.rs

//! Defines `WorkerGuard`, an RAII guard for the process-wide count of dedicated
//! connection workers.

use super::session::SessionId;
use crate::core::metrics;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Number of dedicated workers currently running. Zero at process start.
static ACTIVE_WORKERS: AtomicUsize = AtomicUsize::new(0);

/// Returns how many dedicated workers are running right now.
pub fn active_workers() -> usize {
    ACTIVE_WORKERS.load(Ordering::Relaxed)
}

/// Counts one dedicated worker for as long as it is alive.
pub struct WorkerGuard {
    session_id: SessionId,
}

impl WorkerGuard {
    /// Registers a new worker for `session_id`.
    pub(crate) fn new(session_id: SessionId) -> Self {
        let running = ACTIVE_WORKERS.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::ACTIVE_WORKERS.inc();
        debug!(
            "Worker for session {} started ({} workers running).",
            session_id, running
        );
        Self { session_id }
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        ACTIVE_WORKERS.fetch_sub(1, Ordering::Relaxed);
        metrics::ACTIVE_WORKERS.dec();
        debug!("Worker for session {} exited.", self.session_id);
    }
}
