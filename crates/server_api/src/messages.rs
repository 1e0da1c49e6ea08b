use chrono::{DateTime, Utc};
use shared::{
    domain::{MessageId, UserId},
    error::ApiError,
    protocol::{AckResponse, MessagePayload, SendMessageRequest, ServerEvent},
    validation::{sanitize_display_name, validate_message_text, validate_room_id, validate_user_id},
};
use storage::{NewMessage, StoredMessage};
use tracing::{debug, info};

use crate::{internal, ApiContext, Audience, Dispatch};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub message: MessagePayload,
    /// The client token had already been stored; `message` is that row.
    pub replayed: bool,
}

/// Validates, persists and fans out one send.
///
/// A replayed client token resolves to the stored row and is broadcast again,
/// so a sender that missed its ack still converges on one identity. Private
/// room messages open a ledger entry for both participants, with the sender's
/// entry closed immediately; a replay fills in entries that are missing.
pub async fn send_message(
    ctx: &ApiContext,
    request: SendMessageRequest,
    now: DateTime<Utc>,
) -> Result<Dispatch<SendReceipt>, ApiError> {
    let text = validate_message_text(&request.text)?;
    let author_id = validate_user_id(request.user_id)?;
    let room_id = validate_room_id(&request.room_id)?;
    let author = sanitize_display_name(request.user.as_deref());
    let time = request
        .time
        .filter(|time| !time.trim().is_empty())
        .unwrap_or_else(|| now.format("%H:%M").to_string());
    let client_token = request
        .client_token
        .filter(|token| !token.as_str().is_empty());

    let outcome = ctx
        .storage
        .append_message(NewMessage {
            room_id,
            author_id: Some(author_id),
            author: &author,
            text: &text,
            time: &time,
            target_user_id: None,
            client_token: client_token.as_ref(),
            created_at: now,
        })
        .await
        .map_err(internal)?;
    let replayed = outcome.is_duplicate();
    let stored = outcome.into_message();
    if replayed {
        info!(room = %room_id, message_id = stored.id.0, "client token replayed, reusing stored message");
    } else {
        debug!(room = %room_id, message_id = stored.id.0, author = author_id.0, "message stored");
    }

    let participants = match room_id.private_room() {
        Some(private_id) => ctx
            .storage
            .private_room(private_id)
            .await
            .map_err(internal)?,
        None => None,
    };
    // Repeated on replay: a first attempt may have stored the row and failed
    // before the ledger write. Existing entries are left untouched.
    if let Some(room) = &participants {
        ctx.storage
            .record_pending_deliveries(stored.id, &[room.user1_id, room.user2_id])
            .await
            .map_err(internal)?;
        ctx.storage
            .mark_delivered(stored.id, author_id, now)
            .await
            .map_err(internal)?;
    }

    let message = message_payload(stored);
    let mut dispatch = Dispatch::new(SendReceipt {
        message: message.clone(),
        replayed,
    });
    let event = ServerEvent::ReceiveMessage { message };
    dispatch.push(Audience::Room(room_id), event.clone());
    if let Some(room) = participants {
        dispatch.push(Audience::User(room.user1_id), event.clone());
        dispatch.push(Audience::User(room.user2_id), event);
    }
    Ok(dispatch)
}

/// History for `room` after `since_id`, as seen by `viewer` when given.
pub async fn list_messages(
    ctx: &ApiContext,
    room: &str,
    since_id: Option<i64>,
    viewer: Option<i64>,
    now: DateTime<Utc>,
) -> Result<Vec<MessagePayload>, ApiError> {
    let room_id = validate_room_id(room)?;
    let viewer = viewer.map(validate_user_id).transpose()?;
    let since = MessageId(since_id.unwrap_or_default().max(0));
    let messages = ctx
        .storage
        .list_room_messages(room_id, since, viewer, now)
        .await
        .map_err(internal)?;
    Ok(messages.into_iter().map(message_payload).collect())
}

pub async fn undelivered_for(
    ctx: &ApiContext,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<Vec<MessagePayload>, ApiError> {
    let user_id = validate_user_id(user_id)?;
    let pending = ctx
        .storage
        .undelivered_for(user_id, now)
        .await
        .map_err(internal)?;
    if !pending.is_empty() {
        debug!(user = user_id.0, count = pending.len(), "undelivered messages fetched");
    }
    Ok(pending.into_iter().map(message_payload).collect())
}

/// Closes ledger entries for the listed messages. Non-positive ids are
/// skipped; an empty or all-invalid list is rejected.
pub async fn ack_messages(
    ctx: &ApiContext,
    user_id: i64,
    message_ids: &[i64],
    now: DateTime<Utc>,
) -> Result<AckResponse, ApiError> {
    let user_id: UserId = validate_user_id(user_id)?;
    if message_ids.is_empty() {
        return Err(ApiError::validation("messageIds must be a non-empty array"));
    }
    let ids: Vec<MessageId> = message_ids
        .iter()
        .copied()
        .filter(|id| *id > 0)
        .map(MessageId)
        .collect();
    if ids.is_empty() {
        return Err(ApiError::validation("No valid message IDs"));
    }

    let count = ctx
        .storage
        .mark_delivered_many(user_id, &ids, now)
        .await
        .map_err(internal)?;
    debug!(user = user_id.0, count, "ledger entries acknowledged");
    Ok(AckResponse {
        success: true,
        count,
    })
}

pub fn message_payload(message: StoredMessage) -> MessagePayload {
    MessagePayload {
        id: message.id,
        room_id: message.room_id,
        user_id: message.author_id,
        user: message.author,
        text: message.text,
        time: message.time,
        avatar: message.avatar,
        target_user_id: message.target_user_id,
        client_token: message.client_token,
        timestamp: message.created_at,
    }
}

#[cfg(test)]
#[path = "tests/messages_tests.rs"]
mod tests;
