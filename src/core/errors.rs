// src/core/errors.rs

//! Defines the primary error type for the connection lifecycle core.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing every failure a session or executor can observe.
/// None of these cross into registry bookkeeping: a driver that sees one ends itself.
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Message of {size} bytes exceeds the maximum of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Session was terminated")]
    Terminated,

    #[error("Service executor is not running")]
    ExecutorShutdown,

    #[error("Service executor is in the wrong state: {0}")]
    ExecutorState(String),

    #[error("Request handler failed: {0}")]
    Handler(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Returns true for errors that mean the peer simply went away.
    pub fn is_normal_disconnect(&self) -> bool {
        match self {
            SessionError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionAborted
            ),
            SessionError::Terminated => true,
            _ => false,
        }
    }
}

impl PartialEq for SessionError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SessionError::Io(e1), SessionError::Io(e2)) => e1.kind() == e2.kind(),
            (SessionError::Protocol(s1), SessionError::Protocol(s2)) => s1 == s2,
            (
                SessionError::MessageTooLarge { size: s1, max: m1 },
                SessionError::MessageTooLarge { size: s2, max: m2 },
            ) => s1 == s2 && m1 == m2,
            (SessionError::ExecutorState(s1), SessionError::ExecutorState(s2)) => s1 == s2,
            (SessionError::Handler(s1), SessionError::Handler(s2)) => s1 == s2,
            (SessionError::Internal(s1), SessionError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        SessionError::Io(Arc::new(e))
    }
}
