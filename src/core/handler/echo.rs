// src/core/handler/echo.rs

use super::RequestHandler;
use crate::connection::Session;
use crate::core::SessionError;
use crate::core::protocol::Message;
use async_trait::async_trait;
use tracing::debug;

/// Replies to every request with its own body. Requests with an empty body are
/// treated as fire-and-forget and get no reply.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

#[async_trait]
impl RequestHandler for EchoHandler {
    async fn handle_request(
        &self,
        session: &Session,
        request: Message,
    ) -> Result<Option<Message>, SessionError> {
        debug!(
            "Session {}: echoing {} bytes",
            session.id(),
            request.body.len()
        );
        if request.body.is_empty() {
            return Ok(None);
        }
        Ok(Some(Message::reply_to(&request, request.body.clone())))
    }
}
