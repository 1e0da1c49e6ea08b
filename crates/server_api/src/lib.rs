use shared::{
    domain::{RoomId, UserId},
    error::ApiError,
    protocol::ServerEvent,
};
use storage::Storage;

pub mod hearts;
pub mod messages;
pub mod private_chat;

pub use hearts::{clear_hearts, list_hearts, mark_hearts_read, send_heart};
pub use messages::{
    ack_messages, list_messages, message_payload, send_message, undelivered_for, SendReceipt,
};
pub use private_chat::{
    pending_requests, private_room_for, request_private_chat, respond_private_chat,
};

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

/// Who a live event is addressed to: every connection joined to a room, or
/// every connection registered for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Audience {
    Room(RoomId),
    User(UserId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub audience: Audience,
    pub event: ServerEvent,
}

/// An operation's reply to its caller plus the live events it produced.
/// Publishing the events is left to the transport layer.
#[derive(Debug, Clone)]
pub struct Dispatch<T> {
    pub reply: T,
    pub outbound: Vec<Outbound>,
}

impl<T> Dispatch<T> {
    pub fn new(reply: T) -> Self {
        Self {
            reply,
            outbound: Vec::new(),
        }
    }

    pub fn push(&mut self, audience: Audience, event: ServerEvent) {
        self.outbound.push(Outbound { audience, event });
    }
}

pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Store failures are logged in full; callers only learn that one happened.
fn internal(err: anyhow::Error) -> ApiError {
    tracing::error!(error = format!("{err:#}"), "storage operation failed");
    ApiError::internal(INTERNAL_ERROR_MESSAGE)
}
