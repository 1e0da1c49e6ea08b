use chrono::{DateTime, Utc};
use shared::{
    domain::{ChatRequestId, ChatRequestStatus, PrivateRoomId, RoomId, UserId, SYSTEM_AUTHOR},
    ephemeral::NoticeKind,
    error::{ApiError, ErrorCode},
    protocol::{
        ChatAcceptedNotice, ChatRejectedNotice, ChatRequestNotice, ChatRequestSummary,
        ChatResponse, PrivateChatRequestBody, PrivateChatRequestResponse, PrivateRoomResponse,
        RespondChatRequestBody, RespondChatRequestResponse, ServerEvent,
    },
    validation::validate_user_id,
};
use storage::NewMessage;
use tracing::{debug, info};

use crate::{internal, message_payload, ApiContext, Audience, Dispatch};

const FALLBACK_NAME: &str = "User";

/// Opens or reuses a chat request from `requester` to `requested`.
///
/// A pending request between the pair, in either direction, is returned as is
/// and nobody is notified again. A settled one is reopened in the new
/// direction. The pair's private room exists once this returns.
pub async fn request_private_chat(
    ctx: &ApiContext,
    body: PrivateChatRequestBody,
    now: DateTime<Utc>,
) -> Result<Dispatch<PrivateChatRequestResponse>, ApiError> {
    let requester = validate_user_id(body.requester_id)?;
    let requested = validate_user_id(body.requested_id)?;
    if requester == requested {
        return Err(ApiError::validation(
            "Cannot request private chat with yourself",
        ));
    }

    let existing = ctx
        .storage
        .chat_request_between(requester, requested)
        .await
        .map_err(internal)?;
    let (request_id, notify) = match existing {
        Some(request) if request.status == ChatRequestStatus::Pending => (request.id, false),
        Some(request) => {
            ctx.storage
                .reset_chat_request(request.id, requester, requested, now)
                .await
                .map_err(internal)?;
            (request.id, true)
        }
        None => {
            let id = ctx
                .storage
                .insert_chat_request(requester, requested, now)
                .await
                .map_err(internal)?;
            (id, true)
        }
    };

    let room = ctx
        .storage
        .get_or_create_private_room(requester, requested, now)
        .await
        .map_err(internal)?;
    let mut dispatch = Dispatch::new(PrivateChatRequestResponse {
        success: true,
        request_id,
        room_id: room.id,
        status: ChatRequestStatus::Pending,
    });

    let profile = ctx.storage.user_profile(requester).await.map_err(internal)?;
    if let (true, Some((username, avatar))) = (notify, profile) {
        info!(request = request_id.0, requester = requester.0, requested = requested.0, "chat request sent");
        dispatch.push(
            Audience::User(requested),
            ServerEvent::PrivateChatRequest {
                notice: ChatRequestNotice {
                    request_id,
                    requester_id: requester,
                    requester_username: username.clone(),
                    requester_avatar: avatar,
                    message: format!("{username} wants to start a private chat"),
                    created_at: now,
                },
            },
        );
        post_system_notice(
            ctx,
            &mut dispatch,
            room.id,
            NoticeKind::ChatRequestSent.render(&username),
            requested,
            now,
        )
        .await?;
    }
    Ok(dispatch)
}

/// Answers a pending request on behalf of its addressee.
pub async fn respond_private_chat(
    ctx: &ApiContext,
    body: RespondChatRequestBody,
    now: DateTime<Utc>,
) -> Result<Dispatch<RespondChatRequestResponse>, ApiError> {
    let user_id = validate_user_id(body.user_id)?;
    if body.request_id <= 0 {
        return Err(ApiError::validation("Invalid request ID"));
    }
    let request_id = ChatRequestId(body.request_id);

    let request = ctx
        .storage
        .chat_request(request_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "Request not found"))?;
    if request.requested_id != user_id {
        return Err(ApiError::new(
            ErrorCode::Forbidden,
            "Request not found for this user",
        ));
    }
    if request.status != ChatRequestStatus::Pending {
        return Err(ApiError::validation(format!(
            "Request already {}",
            request.status.as_str()
        )));
    }

    let status = match body.response {
        ChatResponse::Accept => ChatRequestStatus::Accepted,
        ChatResponse::Reject => ChatRequestStatus::Rejected,
    };
    ctx.storage
        .set_chat_request_status(request_id, status, now)
        .await
        .map_err(internal)?;
    info!(request = request_id.0, status = status.as_str(), "chat request answered");

    let requester = request.requester_id;
    let requested = request.requested_id;
    match body.response {
        ChatResponse::Accept => {
            let room = ctx
                .storage
                .get_or_create_private_room(requester, requested, now)
                .await
                .map_err(internal)?;
            let mut dispatch = Dispatch::new(RespondChatRequestResponse {
                success: true,
                status,
                room_id: Some(room.id),
            });
            let event = ServerEvent::PrivateChatAccepted {
                notice: ChatAcceptedNotice {
                    room_id: room.id,
                    requester_id: requester,
                    requested_id: requested,
                    message: "Private chat started!".to_string(),
                    created_at: now,
                },
            };
            dispatch.push(Audience::User(requester), event.clone());
            dispatch.push(Audience::User(requested), event);

            let requested_name = ctx
                .storage
                .username_for_user(requested)
                .await
                .map_err(internal)?
                .unwrap_or_else(|| FALLBACK_NAME.to_string());
            post_system_notice(
                ctx,
                &mut dispatch,
                room.id,
                NoticeKind::ChatRequestAccepted.render(&requested_name),
                requester,
                now,
            )
            .await?;
            Ok(dispatch)
        }
        ChatResponse::Reject => {
            let mut dispatch = Dispatch::new(RespondChatRequestResponse {
                success: true,
                status,
                room_id: None,
            });
            dispatch.push(
                Audience::User(requester),
                ServerEvent::PrivateChatRejected {
                    notice: ChatRejectedNotice {
                        request_id,
                        requested_id: requested,
                        message: "Private chat request was declined".to_string(),
                        created_at: now,
                    },
                },
            );
            Ok(dispatch)
        }
    }
}

pub async fn private_room_for(
    ctx: &ApiContext,
    user1: i64,
    user2: i64,
    now: DateTime<Utc>,
) -> Result<PrivateRoomResponse, ApiError> {
    let (Ok(user1), Ok(user2)) = (validate_user_id(user1), validate_user_id(user2)) else {
        return Err(ApiError::validation("Invalid user IDs"));
    };
    let room = ctx
        .storage
        .get_or_create_private_room(user1, user2, now)
        .await
        .map_err(internal)?;
    Ok(PrivateRoomResponse {
        success: true,
        room_id: room.id,
    })
}

pub async fn pending_requests(
    ctx: &ApiContext,
    user_id: i64,
) -> Result<Vec<ChatRequestSummary>, ApiError> {
    let user_id = validate_user_id(user_id)?;
    let pending = ctx
        .storage
        .pending_chat_requests_for(user_id)
        .await
        .map_err(internal)?;
    Ok(pending
        .into_iter()
        .map(|pending| ChatRequestSummary {
            id: pending.request.id,
            requester_id: pending.request.requester_id,
            requester_username: pending.requester_username,
            requester_avatar: pending.requester_avatar,
            status: pending.request.status,
            created_at: pending.request.created_at,
        })
        .collect())
}

/// Adds a targeted system notice to the room unless an identical one is
/// still visible. The target gets a ledger entry so it reaches them offline.
async fn post_system_notice<T>(
    ctx: &ApiContext,
    dispatch: &mut Dispatch<T>,
    room: PrivateRoomId,
    text: String,
    target: UserId,
    now: DateTime<Utc>,
) -> Result<(), ApiError> {
    let room_id = RoomId::from(room);
    let live = ctx
        .storage
        .live_system_notice(room_id, &text, Some(target), now)
        .await
        .map_err(internal)?;
    if live.is_some() {
        debug!(room = %room_id, target = target.0, "identical notice still visible, skipping");
        return Ok(());
    }

    let time = now.format("%H:%M").to_string();
    let stored = ctx
        .storage
        .append_message(NewMessage {
            room_id,
            author_id: None,
            author: SYSTEM_AUTHOR,
            text: &text,
            time: &time,
            target_user_id: Some(target),
            client_token: None,
            created_at: now,
        })
        .await
        .map_err(internal)?
        .into_message();
    ctx.storage
        .record_pending_deliveries(stored.id, &[target])
        .await
        .map_err(internal)?;

    let event = ServerEvent::ReceiveMessage {
        message: message_payload(stored),
    };
    dispatch.push(Audience::Room(room_id), event.clone());
    dispatch.push(Audience::User(target), event);
    Ok(())
}

#[cfg(test)]
#[path = "tests/private_chat_tests.rs"]
mod tests;
