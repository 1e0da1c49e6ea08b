use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use shared::{
    domain::UserId,
    error::{ApiError, ErrorCode},
    protocol::{ClientRequest, SendAck, ServerEvent},
    validation::{sanitize_display_name, validate_room_id, validate_user_id},
};
use tracing::{debug, info, warn};

use crate::{app_state::AppState, broker::ConnectionId};

const SEND_FAILED: &str = "Failed to send message";

/// Serves one live connection. Requests from the socket are handled one at a
/// time; outbound events flow through a separate writer task.
pub(crate) async fn ws_connection(
    state: Arc<AppState>,
    socket: WebSocket,
    initial_user: Option<UserId>,
) {
    let (mut sender, mut receiver) = socket.split();
    let (connection, mut events_rx) = state.broker.connect().await;
    if let Some(user) = initial_user {
        state.broker.register_user(connection, user).await;
    }
    info!(connection = connection.0, user = ?initial_user.map(|u| u.0), "live connection opened");

    let send_task = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(error) => {
                    warn!(%error, "failed to encode live event");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => handle_text(&state, connection, &text).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.broker.disconnect(connection).await;
    send_task.abort();
    info!(connection = connection.0, "live connection closed");
}

pub(crate) async fn handle_text(state: &AppState, connection: ConnectionId, text: &str) {
    let request = match serde_json::from_str::<ClientRequest>(text) {
        Ok(request) => request,
        Err(error) => {
            debug!(connection = connection.0, %error, "malformed live payload");
            let event = ServerEvent::Error(ApiError::validation(format!("malformed event: {error}")));
            state.broker.send_to(connection, event).await;
            return;
        }
    };
    if let Err(error) = handle_request(state, connection, request).await {
        state.broker.send_to(connection, ServerEvent::Error(error)).await;
    }
}

/// Applies one client request. Errors go back to the originating connection
/// only and nothing is broadcast for them.
pub(crate) async fn handle_request(
    state: &AppState,
    connection: ConnectionId,
    request: ClientRequest,
) -> Result<(), ApiError> {
    match request {
        ClientRequest::RegisterUser { user_id } => {
            let user = validate_user_id(user_id)?;
            state.broker.register_user(connection, user).await;
        }
        ClientRequest::JoinRoom { room_id, user_id } => {
            let room = validate_room_id(&room_id)?;
            let user = user_id.map(validate_user_id).transpose()?;
            state.broker.join_room(connection, room, user).await;
        }
        ClientRequest::TypingStart {
            room_id,
            user_id,
            username,
        } => {
            let room = validate_room_id(&room_id)?;
            let user_id = validate_user_id(user_id)?;
            let event = ServerEvent::UserTyping {
                user_id,
                username: sanitize_display_name(Some(&username)),
            };
            state
                .broker
                .broadcast_room(room, &event, Some(connection))
                .await;
        }
        ClientRequest::TypingStop { room_id, user_id } => {
            let room = validate_room_id(&room_id)?;
            let user_id = validate_user_id(user_id)?;
            state
                .broker
                .broadcast_room(room, &ServerEvent::UserStoppedTyping { user_id }, Some(connection))
                .await;
        }
        ClientRequest::SendMessage { ack_id, message } => {
            match server_api::send_message(&state.api, message, Utc::now()).await {
                Ok(dispatch) => {
                    state.broker.publish(&dispatch.outbound).await;
                    let ack = SendAck::confirmed(&dispatch.reply.message);
                    state
                        .broker
                        .send_to(connection, ServerEvent::SendMessageAck { ack_id, ack })
                        .await;
                }
                Err(error) => {
                    let reason = if error.code == ErrorCode::Internal {
                        SEND_FAILED.to_string()
                    } else {
                        error.message.clone()
                    };
                    state
                        .broker
                        .send_to(
                            connection,
                            ServerEvent::SendMessageAck {
                                ack_id,
                                ack: SendAck::failed(reason),
                            },
                        )
                        .await;
                    return Err(error);
                }
            }
        }
        ClientRequest::SendHeart {
            sender_id,
            receiver_id,
        } => {
            let dispatch =
                server_api::send_heart(&state.api, sender_id, receiver_id, Utc::now()).await?;
            state.broker.publish(&dispatch.outbound).await;
            state
                .broker
                .send_to(
                    connection,
                    ServerEvent::HeartSent {
                        receiver_id: dispatch.reply.receiver_id,
                    },
                )
                .await;
        }
        ClientRequest::AckMessages {
            user_id,
            message_ids,
        } => {
            server_api::ack_messages(&state.api, user_id, &message_ids, Utc::now()).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/ws_tests.rs"]
mod tests;
