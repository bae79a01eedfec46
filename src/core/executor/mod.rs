// src/core/executor/mod.rs

//! The service executor abstraction: a pool that runs discrete driver steps
//! instead of dedicating a worker to each connection.

use crate::core::SessionError;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

mod fixed;
mod stats;

pub use fixed::FixedServiceExecutor;
pub use stats::{ExecutorStats, ExecutorStatsSnapshot};

/// A unit of work posted to an executor.
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Runs scheduled tasks on a set of workers owned by the executor.
#[async_trait]
pub trait ServiceExecutor: Send + Sync {
    /// A short name used in logs and stats output.
    fn name(&self) -> &'static str;

    /// Spawns the executor's workers. Fails if it is already running.
    fn start(&self) -> Result<(), SessionError>;

    /// Stops accepting tasks and waits up to `timeout` for the workers to finish
    /// what they already hold. Workers still busy after that are aborted.
    async fn shutdown(&self, timeout: Duration) -> Result<(), SessionError>;

    /// Queues `task` and returns without waiting for it to run.
    fn schedule(&self, task: Task) -> Result<(), SessionError>;

    fn stats(&self) -> ExecutorStatsSnapshot;
}
