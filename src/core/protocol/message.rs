// src/core/protocol/message.rs

//! A minimal length-prefixed message framing plus the `MessageStream` seam that
//! connection drivers read requests from and write replies to.
//!
//! Layout of a frame, all integers little-endian:
//!
//! | field         | size |
//! |---------------|------|
//! | total length  | 4    |
//! | request id    | 4    |
//! | response to   | 4    |
//! | body          | rest |

use crate::core::SessionError;
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicI32, Ordering};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, Framed};

/// Size of the fixed frame header, including the length prefix itself.
pub const HEADER_LEN: usize = 12;

/// Default upper bound for a single frame.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 48 * 1024 * 1024; // 48MB

static MESSAGE_ID_COUNTER: AtomicI32 = AtomicI32::new(0);

/// Returns a fresh process-wide message id, used to stamp replies.
pub fn next_message_id() -> i32 {
    MESSAGE_ID_COUNTER
        .fetch_add(1, Ordering::Relaxed)
        .wrapping_add(1)
}

/// A single request or reply exchanged with a client.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub request_id: i32,
    pub response_to: i32,
    pub body: Bytes,
}

impl Message {
    pub fn new(request_id: i32, body: impl Into<Bytes>) -> Self {
        Self {
            request_id,
            response_to: 0,
            body: body.into(),
        }
    }

    /// Builds a reply to `request`, stamped with a fresh message id.
    pub fn reply_to(request: &Message, body: impl Into<Bytes>) -> Self {
        Self {
            request_id: next_message_id(),
            response_to: request.request_id,
            body: body.into(),
        }
    }

    /// The on-the-wire size of this message.
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.body.len()
    }
}

/// A `tokio_util::codec` implementation for encoding and decoding `Message`s.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    max_message_size: usize,
}

impl MessageCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = SessionError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let total = item.frame_len();
        if total > self.max_message_size {
            return Err(SessionError::MessageTooLarge {
                size: total,
                max: self.max_message_size,
            });
        }
        dst.reserve(total);
        dst.put_u32_le(total as u32);
        dst.put_i32_le(item.request_id);
        dst.put_i32_le(item.response_to);
        dst.extend_from_slice(&item.body);
        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = SessionError;

    /// Decodes one frame once all of its bytes have arrived; returns `Ok(None)`
    /// while the frame is still incomplete.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }

        let total = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if total < HEADER_LEN {
            return Err(SessionError::Protocol(format!(
                "frame length {total} is smaller than the {HEADER_LEN}-byte header"
            )));
        }
        if total > self.max_message_size {
            return Err(SessionError::MessageTooLarge {
                size: total,
                max: self.max_message_size,
            });
        }
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(total);
        frame.advance(4);
        let request_id = frame.get_i32_le();
        let response_to = frame.get_i32_le();
        Ok(Some(Message {
            request_id,
            response_to,
            body: frame.freeze(),
        }))
    }
}

/// The I/O seam a connection driver talks through.
#[async_trait]
pub trait MessageStream: Send {
    /// Waits for the next request. `Ok(None)` means the peer closed the connection.
    async fn source_message(&mut self) -> Result<Option<Message>, SessionError>;

    /// Writes one reply and flushes it.
    async fn sink_message(&mut self, message: Message) -> Result<(), SessionError>;
}

pub type BoxMessageStream = Box<dyn MessageStream>;

#[async_trait]
impl<T> MessageStream for Framed<T, MessageCodec>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn source_message(&mut self) -> Result<Option<Message>, SessionError> {
        self.next().await.transpose()
    }

    async fn sink_message(&mut self, message: Message) -> Result<(), SessionError> {
        self.send(message).await
    }
}
