// src/connection/mod.rs

//! Manages the lifecycle of client connections: the session endpoint, the
//! per-connection driver, the registry of live drivers and the strategies that
//! execute them.

// Declare the private sub-modules of the `connection` module.
mod context;
mod guard;
mod handler;
mod launcher;
mod registry;
mod restriction;
mod session;
mod transport;

// Publicly re-export the primary types from the sub-modules.
pub use context::ServiceContext;
pub use guard::active_workers;
pub use handler::{CleanupHook, ConnectionHandler, State};
pub use launcher::{DedicatedWorkers, ExecutorScheduled, SessionLauncher, launcher_for};
pub use registry::ConnectionRegistry;
pub use restriction::RestrictionEnvironment;
pub use session::{HostAndPort, Session, SessionId, TagMask};
pub use transport::{SessionStats, TransportLayer};
