use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use server_api::ApiContext;
use shared::{
    error::{ApiError, ErrorCode},
    protocol::{
        AckRequest, AckResponse, ChatRequestSummary, CountResponse, HeartRequest,
        HeartSentResponse, HeartSummary, MessagePayload, PrivateChatRequestBody,
        PrivateChatRequestResponse, PrivateRoomResponse, RespondChatRequestBody,
        RespondChatRequestResponse, SendMessageRequest,
    },
    validation::validate_user_id,
};
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};

mod app_state;
mod broker;
mod config;
mod ws;

use app_state::AppState;
use broker::Broker;
use config::{load_settings, prepare_database_url};

type HttpResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryQuery {
    since_id: Option<i64>,
    user_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoomPairQuery {
    user1_id: i64,
    user2_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WsQuery {
    user_id: Option<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    storage.health_check().await?;

    let state = AppState {
        api: ApiContext { storage },
        broker: Broker::new(settings.event_buffer),
        max_body_bytes: settings.max_body_bytes,
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.max_body_bytes;
    Router::new()
        .route("/healthz", get(healthz))
        .route("/messages", post(http_send_message))
        .route("/messages/ack", post(http_ack_messages))
        .route("/messages/undelivered/:user_id", get(http_undelivered))
        .route("/messages/:room_id", get(http_list_messages))
        .route("/hearts", post(http_send_heart))
        .route("/hearts/:user_id", get(http_list_hearts).delete(http_clear_hearts))
        .route("/hearts/:user_id/read", post(http_mark_hearts_read))
        .route("/private-chat/request", post(http_request_private_chat))
        .route("/private-chat/respond", post(http_respond_private_chat))
        .route("/private-chat/room", get(http_private_room))
        .route("/private-chat/requests/:user_id", get(http_pending_requests))
        .route("/ws", get(ws_handler))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(state)
}

fn http_error(error: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match error.code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(error))
}

async fn healthz(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    match state.api.storage.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(error) => {
            error!(%error, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(q): Query<WsQuery>,
) -> impl IntoResponse {
    let user = q.user_id.and_then(|raw| validate_user_id(raw).ok());
    ws.on_upgrade(move |socket| ws::ws_connection(state, socket, user))
}

async fn http_send_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendMessageRequest>,
) -> HttpResult<MessagePayload> {
    let dispatch = server_api::send_message(&state.api, req, Utc::now())
        .await
        .map_err(http_error)?;
    state.broker.publish(&dispatch.outbound).await;
    Ok(Json(dispatch.reply.message))
}

async fn http_list_messages(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> HttpResult<Vec<MessagePayload>> {
    let messages = server_api::list_messages(&state.api, &room_id, q.since_id, q.user_id, Utc::now())
        .await
        .map_err(http_error)?;
    Ok(Json(messages))
}

async fn http_undelivered(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> HttpResult<Vec<MessagePayload>> {
    let messages = server_api::undelivered_for(&state.api, user_id, Utc::now())
        .await
        .map_err(http_error)?;
    Ok(Json(messages))
}

async fn http_ack_messages(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AckRequest>,
) -> HttpResult<AckResponse> {
    let response = server_api::ack_messages(&state.api, req.user_id, &req.message_ids, Utc::now())
        .await
        .map_err(http_error)?;
    Ok(Json(response))
}

async fn http_send_heart(
    State(state): State<Arc<AppState>>,
    Json(req): Json<HeartRequest>,
) -> HttpResult<HeartSentResponse> {
    let dispatch = server_api::send_heart(&state.api, req.sender_id, req.receiver_id, Utc::now())
        .await
        .map_err(http_error)?;
    state.broker.publish(&dispatch.outbound).await;
    Ok(Json(dispatch.reply))
}

async fn http_list_hearts(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> HttpResult<Vec<HeartSummary>> {
    let hearts = server_api::list_hearts(&state.api, user_id)
        .await
        .map_err(http_error)?;
    Ok(Json(hearts))
}

async fn http_mark_hearts_read(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> HttpResult<CountResponse> {
    let response = server_api::mark_hearts_read(&state.api, user_id)
        .await
        .map_err(http_error)?;
    Ok(Json(response))
}

async fn http_clear_hearts(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> HttpResult<CountResponse> {
    let response = server_api::clear_hearts(&state.api, user_id)
        .await
        .map_err(http_error)?;
    Ok(Json(response))
}

async fn http_request_private_chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PrivateChatRequestBody>,
) -> HttpResult<PrivateChatRequestResponse> {
    let dispatch = server_api::request_private_chat(&state.api, req, Utc::now())
        .await
        .map_err(http_error)?;
    state.broker.publish(&dispatch.outbound).await;
    Ok(Json(dispatch.reply))
}

async fn http_respond_private_chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RespondChatRequestBody>,
) -> HttpResult<RespondChatRequestResponse> {
    let dispatch = server_api::respond_private_chat(&state.api, req, Utc::now())
        .await
        .map_err(http_error)?;
    state.broker.publish(&dispatch.outbound).await;
    Ok(Json(dispatch.reply))
}

async fn http_private_room(
    State(state): State<Arc<AppState>>,
    Query(q): Query<RoomPairQuery>,
) -> HttpResult<PrivateRoomResponse> {
    let response = server_api::private_room_for(&state.api, q.user1_id, q.user2_id, Utc::now())
        .await
        .map_err(http_error)?;
    Ok(Json(response))
}

async fn http_pending_requests(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> HttpResult<Vec<ChatRequestSummary>> {
    let requests = server_api::pending_requests(&state.api, user_id)
        .await
        .map_err(http_error)?;
    Ok(Json(requests))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
