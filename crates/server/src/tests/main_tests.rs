use super::*;
use axum::{
    body::{self, Body},
    http::Request,
};
use serde::de::DeserializeOwned;
use shared::domain::UserId;
use tower::ServiceExt;

async fn test_app() -> (Router, Arc<AppState>, UserId, UserId) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let alice = storage.create_user("alice", None).await.expect("user");
    let bob = storage.create_user("bob", None).await.expect("user");
    let state = Arc::new(AppState {
        api: ApiContext { storage },
        broker: Broker::new(32),
        max_body_bytes: 16 * 1024,
    });
    (build_router(state.clone()), state, alice, bob)
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).expect("request")
}

async fn read_json<T: DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

fn send_body(user: UserId, text: &str, token: &str) -> serde_json::Value {
    serde_json::json!({
        "roomId": "happy",
        "userId": user.0,
        "user": "A",
        "text": text,
        "clientToken": token
    })
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let (app, _, _, _) = test_app().await;
    let response = app.oneshot(get("/healthz")).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn duplicate_http_sends_resolve_to_one_message() {
    let (app, _, alice, _) = test_app().await;
    let first = app
        .clone()
        .oneshot(post_json("/messages", send_body(alice, "hi", "tok-1")))
        .await
        .expect("response");
    assert_eq!(first.status(), StatusCode::OK);
    let first: MessagePayload = read_json(first).await;

    let second = app
        .clone()
        .oneshot(post_json("/messages", send_body(alice, "hi", "tok-1")))
        .await
        .expect("response");
    let second: MessagePayload = read_json(second).await;
    assert_eq!(first.id, second.id);

    let history = app
        .clone()
        .oneshot(get("/messages/happy?sinceId=0"))
        .await
        .expect("response");
    let history: Vec<MessagePayload> = read_json(history).await;
    assert_eq!(history.len(), 1);

    let empty = app
        .oneshot(get(&format!("/messages/happy?sinceId={}", first.id.0)))
        .await
        .expect("response");
    let empty: Vec<MessagePayload> = read_json(empty).await;
    assert!(empty.is_empty());
}

#[tokio::test]
async fn http_send_is_pushed_to_live_room_members() {
    let (app, state, alice, bob) = test_app().await;
    let (listener, mut rx) = state.broker.connect().await;
    state
        .broker
        .join_room(listener, shared::domain::RoomId::Mood(shared::domain::Mood::Happy), Some(bob))
        .await;

    let response = app
        .oneshot(post_json("/messages", send_body(alice, "hello", "tok-9")))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(matches!(
        rx.try_recv(),
        Ok(shared::protocol::ServerEvent::ReceiveMessage { .. })
    ));
}

#[tokio::test]
async fn validation_failures_map_to_bad_request() {
    let (app, _, alice, _) = test_app().await;
    let long = "a".repeat(501);
    let response = app
        .clone()
        .oneshot(post_json("/messages", send_body(alice, &long, "tok-2")))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: ApiError = read_json(response).await;
    assert_eq!(error.code, ErrorCode::Validation);

    let response = app
        .clone()
        .oneshot(get("/messages/lobby"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(post_json(
            "/hearts",
            serde_json::json!({ "senderId": alice.0, "receiverId": alice.0 }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn undelivered_private_messages_clear_after_ack() {
    let (app, state, alice, bob) = test_app().await;
    let room = state
        .api
        .storage
        .get_or_create_private_room(alice, bob, Utc::now())
        .await
        .expect("room");
    let body = serde_json::json!({
        "roomId": format!("private_{}", room.id.0),
        "userId": alice.0,
        "user": "alice",
        "text": "are you there?",
        "clientToken": "tok-p"
    });
    let sent = app
        .clone()
        .oneshot(post_json("/messages", body))
        .await
        .expect("response");
    let sent: MessagePayload = read_json(sent).await;

    let pending = app
        .clone()
        .oneshot(get(&format!("/messages/undelivered/{}", bob.0)))
        .await
        .expect("response");
    let pending: Vec<MessagePayload> = read_json(pending).await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, sent.id);

    let ack = app
        .clone()
        .oneshot(post_json(
            "/messages/ack",
            serde_json::json!({ "userId": bob.0, "messageIds": [sent.id.0] }),
        ))
        .await
        .expect("response");
    let ack: AckResponse = read_json(ack).await;
    assert_eq!(ack.count, 1);

    let pending = app
        .oneshot(get(&format!("/messages/undelivered/{}", bob.0)))
        .await
        .expect("response");
    let pending: Vec<MessagePayload> = read_json(pending).await;
    assert!(pending.is_empty());
}

#[tokio::test]
async fn private_chat_handshake_over_http() {
    let (app, _, alice, bob) = test_app().await;
    let requested = app
        .clone()
        .oneshot(post_json(
            "/private-chat/request",
            serde_json::json!({ "requesterId": alice.0, "requestedId": bob.0 }),
        ))
        .await
        .expect("response");
    assert_eq!(requested.status(), StatusCode::OK);
    let requested: PrivateChatRequestResponse = read_json(requested).await;

    let pending = app
        .clone()
        .oneshot(get(&format!("/private-chat/requests/{}", bob.0)))
        .await
        .expect("response");
    let pending: Vec<ChatRequestSummary> = read_json(pending).await;
    assert_eq!(pending.len(), 1);

    let wrong_user = app
        .clone()
        .oneshot(post_json(
            "/private-chat/respond",
            serde_json::json!({
                "requestId": requested.request_id.0,
                "userId": alice.0,
                "response": "accept"
            }),
        ))
        .await
        .expect("response");
    assert_eq!(wrong_user.status(), StatusCode::FORBIDDEN);

    let accepted = app
        .clone()
        .oneshot(post_json(
            "/private-chat/respond",
            serde_json::json!({
                "requestId": requested.request_id.0,
                "userId": bob.0,
                "response": "accept"
            }),
        ))
        .await
        .expect("response");
    let accepted: RespondChatRequestResponse = read_json(accepted).await;
    assert_eq!(accepted.room_id, Some(requested.room_id));

    let room = app
        .oneshot(get(&format!(
            "/private-chat/room?user1Id={}&user2Id={}",
            bob.0, alice.0
        )))
        .await
        .expect("response");
    let room: PrivateRoomResponse = read_json(room).await;
    assert_eq!(room.room_id, requested.room_id);
}

#[tokio::test]
async fn hearts_routes_list_read_and_clear() {
    let (app, _, alice, bob) = test_app().await;
    let sent = app
        .clone()
        .oneshot(post_json(
            "/hearts",
            serde_json::json!({ "senderId": alice.0, "receiverId": bob.0 }),
        ))
        .await
        .expect("response");
    assert_eq!(sent.status(), StatusCode::OK);

    let read = app
        .clone()
        .oneshot(
            Request::post(format!("/hearts/{}/read", bob.0))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    let read: CountResponse = read_json(read).await;
    assert_eq!(read.count, 1);

    let hearts = app
        .clone()
        .oneshot(get(&format!("/hearts/{}", bob.0)))
        .await
        .expect("response");
    let hearts: Vec<HeartSummary> = read_json(hearts).await;
    assert!(hearts[0].is_read);

    let cleared = app
        .oneshot(
            Request::delete(format!("/hearts/{}", bob.0))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    let cleared: CountResponse = read_json(cleared).await;
    assert_eq!(cleared.count, 1);
}

#[tokio::test]
async fn oversized_bodies_are_rejected() {
    let (app, _, alice, _) = test_app().await;
    let huge = "a".repeat(32 * 1024);
    let response = app
        .oneshot(post_json("/messages", send_body(alice, &huge, "tok-big")))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
