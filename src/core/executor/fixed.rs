// src/core/executor/fixed.rs

//! A service executor backed by a fixed number of worker tasks.

use super::{ExecutorStats, ExecutorStatsSnapshot, ServiceExecutor, Task};
use crate::core::SessionError;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Runs scheduled tasks on `threads` long-lived workers.
///
/// Tasks are dealt to workers round robin. Each worker keeps all of its tasks in
/// flight at once, so a task parked on network I/O never holds up the others
/// queued behind it.
pub struct FixedServiceExecutor {
    threads: usize,
    stats: Arc<ExecutorStats>,
    running: AtomicBool,
    next_worker: AtomicUsize,
    senders: RwLock<Vec<mpsc::UnboundedSender<Task>>>,
    workers: Mutex<JoinSet<()>>,
}

impl FixedServiceExecutor {
    /// Creates a stopped executor with `threads` workers (at least one).
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
            stats: Arc::new(ExecutorStats::new()),
            running: AtomicBool::new(false),
            next_worker: AtomicUsize::new(0),
            senders: RwLock::new(Vec::new()),
            workers: Mutex::new(JoinSet::new()),
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ServiceExecutor for FixedServiceExecutor {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn start(&self) -> Result<(), SessionError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(SessionError::ExecutorState(
                "fixed executor is already running".to_string(),
            ));
        }

        let mut senders = self.senders.write();
        let mut workers = self.workers.lock();
        for worker_id in 0..self.threads {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            workers.spawn(worker_loop(worker_id, rx));
        }

        info!("Started fixed service executor with {} workers.", self.threads);
        Ok(())
    }

    async fn shutdown(&self, timeout: Duration) -> Result<(), SessionError> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Err(SessionError::ExecutorState(
                "fixed executor is not running".to_string(),
            ));
        }

        // Closing every queue lets each worker finish what it holds and exit.
        self.senders.write().clear();
        let mut workers = std::mem::take(&mut *self.workers.lock());

        let drained = tokio::time::timeout(timeout, async {
            while workers.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                "Fixed service executor workers did not finish within {:?}, aborting {} of them.",
                timeout,
                workers.len()
            );
            workers.shutdown().await;
            return Err(SessionError::ExecutorState(format!(
                "fixed executor did not drain within {timeout:?}"
            )));
        }

        info!("Fixed service executor shut down.");
        Ok(())
    }

    fn schedule(&self, task: Task) -> Result<(), SessionError> {
        if !self.is_running() {
            return Err(SessionError::ExecutorShutdown);
        }

        let senders = self.senders.read();
        if senders.is_empty() {
            return Err(SessionError::ExecutorShutdown);
        }
        let index = self.next_worker.fetch_add(1, Ordering::Relaxed) % senders.len();
        senders[index]
            .send(self.stats.wrap(task))
            .map_err(|_| SessionError::ExecutorShutdown)
    }

    fn stats(&self) -> ExecutorStatsSnapshot {
        self.stats.snapshot()
    }
}

async fn worker_loop(worker_id: usize, mut rx: mpsc::UnboundedReceiver<Task>) {
    debug!("Executor worker {} started.", worker_id);
    let mut in_flight = FuturesUnordered::new();

    loop {
        tokio::select! {
            maybe_task = rx.recv() => match maybe_task {
                Some(task) => in_flight.push(task),
                None => break,
            },
            Some(()) = in_flight.next(), if !in_flight.is_empty() => {}
        }
    }

    debug!(
        "Executor worker {} draining {} in-flight tasks.",
        worker_id,
        in_flight.len()
    );
    while in_flight.next().await.is_some() {}
    debug!("Executor worker {} stopped.", worker_id);
}
