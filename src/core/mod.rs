// src/core/mod.rs

//! Building blocks shared by the connection layer and the server: errors,
//! metrics, message framing, request handling and service executors.

pub mod errors;
pub mod executor;
pub mod handler;
pub mod metrics;
pub mod protocol;

pub use errors::SessionError;
