// src/core/handler/mod.rs

//! The request-processing seam a connection driver calls into. Command dispatch
//! lives behind `RequestHandler`; the lifecycle core only sees messages in and out.

use crate::connection::Session;
use crate::core::SessionError;
use crate::core::protocol::Message;
use async_trait::async_trait;

mod echo;

pub use echo::EchoHandler;

/// Turns one request into at most one reply.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handles `request` received on `session`.
    ///
    /// Returning `Ok(None)` means the request expects no reply. Returning an error
    /// ends the session.
    async fn handle_request(
        &self,
        session: &Session,
        request: Message,
    ) -> Result<Option<Message>, SessionError>;
}
