// src/core/protocol/mod.rs

pub mod message;
pub use message::{
    BoxMessageStream, DEFAULT_MAX_MESSAGE_SIZE, HEADER_LEN, Message, MessageCodec, MessageStream,
    next_message_id,
};
