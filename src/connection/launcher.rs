// src/connection/launcher.rs

//! The two ways a started session gets executed: a dedicated worker per
//! connection, or steps scheduled on a shared service executor.

use super::context::ServiceContext;
use super::guard::{WorkerGuard, active_workers};
use super::handler::{ConnectionHandler, State};
use crate::config::get_available_cores;
use std::sync::Arc;

/// Starts execution of a freshly registered driver.
pub trait SessionLauncher: Send + Sync {
    /// True when drivers launched this way step themselves synchronously, i.e.
    /// without an executor.
    fn is_synchronous(&self) -> bool;

    fn launch(&self, handler: Arc<ConnectionHandler>);
}

/// Spawns one worker task per connection that steps the driver until it ends.
pub struct DedicatedWorkers {
    yield_when_oversubscribed: bool,
    cores: usize,
}

impl DedicatedWorkers {
    pub fn new(yield_when_oversubscribed: bool) -> Self {
        Self::with_cores(yield_when_oversubscribed, get_available_cores())
    }

    pub fn with_cores(yield_when_oversubscribed: bool, cores: usize) -> Self {
        Self {
            yield_when_oversubscribed,
            cores: cores.max(1),
        }
    }
}

impl SessionLauncher for DedicatedWorkers {
    fn is_synchronous(&self) -> bool {
        true
    }

    fn launch(&self, handler: Arc<ConnectionHandler>) {
        let yield_when_oversubscribed = self.yield_when_oversubscribed;
        let cores = self.cores;
        tokio::spawn(async move {
            let _guard = WorkerGuard::new(handler.session().id());
            while handler.state() != State::Ended {
                handler.run_next().await;

                // Yielding between requests helps throughput once workers outnumber cores.
                if yield_when_oversubscribed && active_workers() > cores {
                    tokio::task::yield_now().await;
                }
            }
        });
    }
}

/// Hands each driver to the service executor, which then drives its progress.
pub struct ExecutorScheduled;

impl SessionLauncher for ExecutorScheduled {
    fn is_synchronous(&self) -> bool {
        false
    }

    fn launch(&self, handler: Arc<ConnectionHandler>) {
        handler.schedule_next();
    }
}

/// Picks the launcher matching the context: executor-scheduled when an executor
/// is configured, dedicated workers otherwise.
pub fn launcher_for(context: &ServiceContext) -> Box<dyn SessionLauncher> {
    if context.executor.is_some() {
        Box::new(ExecutorScheduled)
    } else {
        Box::new(DedicatedWorkers::new(context.yield_when_oversubscribed))
    }
}
