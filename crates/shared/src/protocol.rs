use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{
        ChatRequestId, ChatRequestStatus, ClientToken, HeartId, MessageId, PrivateRoomId, RoomId,
        UserId,
    },
    ephemeral,
    error::ApiError,
};

/// A stored message as seen by clients, on both the live and the pull path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: MessageId,
    pub room_id: RoomId,
    pub user_id: Option<UserId>,
    pub user: String,
    pub text: String,
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<ClientToken>,
    pub timestamp: DateTime<Utc>,
}

impl MessagePayload {
    pub fn is_ephemeral_notice(&self) -> bool {
        ephemeral::is_ephemeral_notice(self.user_id, &self.user, &self.text)
    }

    pub fn is_expired_notice(&self, now: DateTime<Utc>) -> bool {
        self.is_ephemeral_notice() && ephemeral::is_expired(Some(self.timestamp), now)
    }

    /// Whether `viewer` may see this message; untargeted messages are public.
    pub fn visible_to(&self, viewer: UserId) -> bool {
        self.target_user_id.map_or(true, |target| target == viewer)
    }
}

/// Body of a send, on the live channel and on `POST /messages`. Fields stay
/// loosely typed until the pipeline validates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub room_id: String,
    pub user_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<ClientToken>,
}

/// Reply to a live `send_message`, correlated by the request's ack id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendAck {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<ClientToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendAck {
    pub fn confirmed(message: &MessagePayload) -> Self {
        Self {
            ok: true,
            id: Some(message.id),
            client_token: message.client_token.clone(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            id: None,
            client_token: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckRequest {
    pub user_id: i64,
    pub message_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckResponse {
    pub success: bool,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountResponse {
    pub success: bool,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartRequest {
    pub sender_id: i64,
    pub receiver_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartSentResponse {
    pub success: bool,
    pub receiver_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartNotice {
    pub sender_id: UserId,
    pub sender_username: String,
    pub receiver_id: UserId,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartSummary {
    pub id: HeartId,
    pub sender_id: UserId,
    pub sender_username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_avatar: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateChatRequestBody {
    pub requester_id: i64,
    pub requested_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateChatRequestResponse {
    pub success: bool,
    pub request_id: ChatRequestId,
    pub room_id: PrivateRoomId,
    pub status: ChatRequestStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatResponse {
    Accept,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondChatRequestBody {
    pub request_id: i64,
    pub user_id: i64,
    pub response: ChatResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondChatRequestResponse {
    pub success: bool,
    pub status: ChatRequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<PrivateRoomId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateRoomResponse {
    pub success: bool,
    pub room_id: PrivateRoomId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequestSummary {
    pub id: ChatRequestId,
    pub requester_id: UserId,
    pub requester_username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester_avatar: Option<String>,
    pub status: ChatRequestStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequestNotice {
    pub request_id: ChatRequestId,
    pub requester_id: UserId,
    pub requester_username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester_avatar: Option<String>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAcceptedNotice {
    pub room_id: PrivateRoomId,
    pub requester_id: UserId,
    pub requested_id: UserId,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRejectedNotice {
    pub request_id: ChatRequestId,
    pub requested_id: UserId,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientRequest {
    RegisterUser {
        user_id: i64,
    },
    JoinRoom {
        room_id: String,
        #[serde(default)]
        user_id: Option<i64>,
    },
    TypingStart {
        room_id: String,
        user_id: i64,
        username: String,
    },
    TypingStop {
        room_id: String,
        user_id: i64,
    },
    SendMessage {
        ack_id: u64,
        message: SendMessageRequest,
    },
    SendHeart {
        sender_id: i64,
        receiver_id: i64,
    },
    AckMessages {
        user_id: i64,
        message_ids: Vec<i64>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    ReceiveMessage {
        message: MessagePayload,
    },
    SendMessageAck {
        ack_id: u64,
        ack: SendAck,
    },
    UserTyping {
        user_id: UserId,
        username: String,
    },
    UserStoppedTyping {
        user_id: UserId,
    },
    UserLeft {
        user_id: UserId,
    },
    HeartNotification {
        notice: HeartNotice,
    },
    HeartSent {
        receiver_id: UserId,
    },
    PrivateChatRequest {
        notice: ChatRequestNotice,
    },
    PrivateChatAccepted {
        notice: ChatAcceptedNotice,
    },
    PrivateChatRejected {
        notice: ChatRejectedNotice,
    },
    Error(ApiError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Mood;

    fn sample_message() -> MessagePayload {
        MessagePayload {
            id: MessageId(5),
            room_id: RoomId::Mood(Mood::Happy),
            user_id: Some(UserId(1)),
            user: "alice".into(),
            text: "hi".into(),
            time: "10:00".into(),
            avatar: None,
            target_user_id: None,
            client_token: Some(ClientToken::from("tok-1")),
            timestamp: "2024-01-01T00:00:00Z".parse().expect("timestamp"),
        }
    }

    #[test]
    fn server_events_use_snake_case_tags_and_camel_case_fields() {
        let event = ServerEvent::ReceiveMessage {
            message: sample_message(),
        };
        let json = serde_json::to_value(&event).expect("json");
        assert_eq!(json["type"], "receive_message");
        assert_eq!(json["payload"]["message"]["roomId"], "happy");
        assert_eq!(json["payload"]["message"]["clientToken"], "tok-1");

        let typing = serde_json::to_value(ServerEvent::UserTyping {
            user_id: UserId(3),
            username: "c".into(),
        })
        .expect("json");
        assert_eq!(typing["payload"]["userId"], 3);
    }

    #[test]
    fn client_send_message_parses_from_wire_shape() {
        let raw = serde_json::json!({
            "type": "send_message",
            "payload": {
                "ackId": 4,
                "message": {
                    "roomId": "happy",
                    "userId": 1,
                    "user": "A",
                    "text": "hi",
                    "clientToken": "tok-1"
                }
            }
        });
        let request: ClientRequest = serde_json::from_value(raw).expect("parse");
        let ClientRequest::SendMessage { ack_id, message } = request else {
            panic!("expected send_message");
        };
        assert_eq!(ack_id, 4);
        assert_eq!(message.client_token, Some(ClientToken::from("tok-1")));
    }

    #[test]
    fn targeted_messages_are_visible_only_to_their_target() {
        let mut message = sample_message();
        assert!(message.visible_to(UserId(99)));
        message.target_user_id = Some(UserId(2));
        assert!(message.visible_to(UserId(2)));
        assert!(!message.visible_to(UserId(1)));
    }
}
