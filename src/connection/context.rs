// src/connection/context.rs

use crate::config::Config;
use crate::core::executor::ServiceExecutor;
use crate::core::handler::RequestHandler;
use std::sync::Arc;

/// Everything a connection driver needs from the surrounding server.
pub struct ServiceContext {
    /// Produces replies for incoming requests.
    pub handler: Arc<dyn RequestHandler>,
    /// When set, drivers are stepped on this executor instead of on a
    /// dedicated worker per connection.
    pub executor: Option<Arc<dyn ServiceExecutor>>,
    /// Upper bound used to report available sessions.
    pub max_clients: usize,
    /// Suppresses the per-connection "end connection" log line.
    pub quiet: bool,
    /// Lets dedicated workers yield after each step when there are more
    /// workers than cores.
    pub yield_when_oversubscribed: bool,
}

impl ServiceContext {
    pub fn new(handler: Arc<dyn RequestHandler>) -> Self {
        Self {
            handler,
            executor: None,
            max_clients: crate::config::default_max_clients(),
            quiet: false,
            yield_when_oversubscribed: true,
        }
    }

    /// Builds a context from the server configuration.
    pub fn from_config(
        config: &Config,
        handler: Arc<dyn RequestHandler>,
        executor: Option<Arc<dyn ServiceExecutor>>,
    ) -> Self {
        Self {
            handler,
            executor,
            max_clients: config.max_clients,
            quiet: config.quiet,
            yield_when_oversubscribed: config.executor.yield_when_oversubscribed,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn ServiceExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }
}
