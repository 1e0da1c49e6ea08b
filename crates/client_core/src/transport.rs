use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{MessageId, RoomId, UserId},
    error::ApiError,
    protocol::{
        AckRequest, AckResponse, ClientRequest, MessagePayload, SendAck, SendMessageRequest,
        ServerEvent,
    },
};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

/// The durable request/response path.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn fetch_messages(
        &self,
        room: RoomId,
        since_id: i64,
        viewer: UserId,
    ) -> SyncResult<Vec<MessagePayload>>;
    async fn post_message(&self, request: &SendMessageRequest) -> SyncResult<MessagePayload>;
    async fn fetch_undelivered(&self, user: UserId) -> SyncResult<Vec<MessagePayload>>;
    async fn ack(&self, user: UserId, ids: &[MessageId]) -> SyncResult<u64>;
}

pub struct HttpTransport {
    http: Client,
    server_url: String,
}

impl HttpTransport {
    pub fn new(server_url: impl Into<String>) -> SyncResult<Self> {
        let server_url = server_url.into().trim_end_matches('/').to_string();
        if !server_url.starts_with("http://") && !server_url.starts_with("https://") {
            return Err(SyncError::InvalidServerUrl);
        }
        Ok(Self {
            http: Client::new(),
            server_url,
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> SyncResult<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let body = response.bytes().await?;
    match serde_json::from_slice::<ApiError>(&body) {
        Ok(error) => Err(SyncError::Rejected { status, error }),
        Err(_) => Err(SyncError::Status(status)),
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn fetch_messages(
        &self,
        room: RoomId,
        since_id: i64,
        viewer: UserId,
    ) -> SyncResult<Vec<MessagePayload>> {
        let response = self
            .http
            .get(format!("{}/messages/{room}", self.server_url))
            .query(&[("sinceId", since_id), ("userId", viewer.0)])
            .send()
            .await?;
        decode(response).await
    }

    async fn post_message(&self, request: &SendMessageRequest) -> SyncResult<MessagePayload> {
        let response = self
            .http
            .post(format!("{}/messages", self.server_url))
            .json(request)
            .send()
            .await?;
        decode(response).await
    }

    async fn fetch_undelivered(&self, user: UserId) -> SyncResult<Vec<MessagePayload>> {
        let response = self
            .http
            .get(format!("{}/messages/undelivered/{}", self.server_url, user.0))
            .send()
            .await?;
        decode(response).await
    }

    async fn ack(&self, user: UserId, ids: &[MessageId]) -> SyncResult<u64> {
        let body = AckRequest {
            user_id: user.0,
            message_ids: ids.iter().map(|id| id.0).collect(),
        };
        let response = self
            .http
            .post(format!("{}/messages/ack", self.server_url))
            .json(&body)
            .send()
            .await?;
        let ack: AckResponse = decode(response).await?;
        Ok(ack.count)
    }
}

/// What the live channel reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveSignal {
    /// A socket is up. `resumed` is set on every connection after the first.
    Connected { resumed: bool },
    Disconnected,
    /// Reconnect attempts for this outage are exhausted.
    GaveUp,
    Event(ServerEvent),
}

/// The push path. Delivery is at-least-once at best; callers reconcile.
#[async_trait]
pub trait LiveLink: Send + Sync {
    fn is_connected(&self) -> bool;
    async fn emit(&self, request: ClientRequest) -> SyncResult<()>;
    /// Sends a message and waits for its correlated ack.
    async fn send_message(
        &self,
        message: SendMessageRequest,
        timeout: Duration,
    ) -> SyncResult<SendAck>;
}

#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsLiveChannel {
    connected: AtomicBool,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    acks: Mutex<HashMap<u64, oneshot::Sender<SendAck>>>,
    next_ack_id: AtomicU64,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

pub fn ws_url(server_url: &str, user: UserId) -> SyncResult<String> {
    let base = if server_url.starts_with("https://") {
        server_url.replacen("https://", "wss://", 1)
    } else if server_url.starts_with("http://") {
        server_url.replacen("http://", "ws://", 1)
    } else {
        return Err(SyncError::InvalidServerUrl);
    };
    Ok(format!("{}/ws?userId={}", base.trim_end_matches('/'), user.0))
}

impl WsLiveChannel {
    /// Starts the connection supervisor. Connecting happens in the background;
    /// progress is reported through `signals`.
    pub async fn connect(
        server_url: &str,
        user: UserId,
        policy: ReconnectPolicy,
        signals: mpsc::UnboundedSender<LiveSignal>,
    ) -> SyncResult<Arc<Self>> {
        let url = ws_url(server_url, user)?;
        let channel = Arc::new(Self {
            connected: AtomicBool::new(false),
            outbound: Mutex::new(None),
            acks: Mutex::new(HashMap::new()),
            next_ack_id: AtomicU64::new(1),
            supervisor: Mutex::new(None),
        });
        let task = tokio::spawn(Arc::clone(&channel).supervise(url, policy, signals));
        *channel.supervisor.lock().await = Some(task);
        Ok(channel)
    }

    pub async fn close(&self) {
        if let Some(task) = self.supervisor.lock().await.take() {
            task.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
        *self.outbound.lock().await = None;
        self.acks.lock().await.clear();
    }

    async fn supervise(
        self: Arc<Self>,
        url: String,
        policy: ReconnectPolicy,
        signals: mpsc::UnboundedSender<LiveSignal>,
    ) {
        let mut resumed = false;
        loop {
            let mut attempts = 0;
            let socket = loop {
                match connect_async(url.as_str()).await {
                    Ok((socket, _)) => break Some(socket),
                    Err(error) => {
                        attempts += 1;
                        warn!(%url, %error, attempts, "live channel connect failed");
                        if attempts >= policy.max_attempts {
                            break None;
                        }
                        tokio::time::sleep(policy.delay).await;
                    }
                }
            };
            let Some(socket) = socket else {
                warn!(%url, "live channel gave up reconnecting");
                let _ = signals.send(LiveSignal::GaveUp);
                return;
            };

            self.serve(socket, resumed, &signals).await;
            resumed = true;
            if signals.is_closed() {
                return;
            }
            tokio::time::sleep(policy.delay).await;
        }
    }

    async fn serve(
        &self,
        socket: Socket,
        resumed: bool,
        signals: &mpsc::UnboundedSender<LiveSignal>,
    ) {
        let (mut writer, mut reader) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        *self.outbound.lock().await = Some(tx);
        self.connected.store(true, Ordering::SeqCst);
        info!(resumed, "live channel connected");
        let _ = signals.send(LiveSignal::Connected { resumed });

        let write_task = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if writer.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        while let Some(frame) = reader.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(ServerEvent::SendMessageAck { ack_id, ack }) => {
                        match self.acks.lock().await.remove(&ack_id) {
                            Some(waiter) => {
                                let _ = waiter.send(ack);
                            }
                            None => debug!(ack_id, "late live ack ignored"),
                        }
                    }
                    Ok(event) => {
                        let _ = signals.send(LiveSignal::Event(event));
                    }
                    Err(error) => warn!(%error, "invalid live event"),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(error) => {
                    warn!(%error, "live channel receive failed");
                    break;
                }
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        *self.outbound.lock().await = None;
        write_task.abort();
        self.acks.lock().await.clear();
        info!("live channel disconnected");
        let _ = signals.send(LiveSignal::Disconnected);
    }
}

#[async_trait]
impl LiveLink for WsLiveChannel {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn emit(&self, request: ClientRequest) -> SyncResult<()> {
        let text = serde_json::to_string(&request)?;
        let guard = self.outbound.lock().await;
        let Some(outbound) = guard.as_ref() else {
            return Err(SyncError::Disconnected);
        };
        outbound.send(text).map_err(|_| SyncError::Disconnected)
    }

    async fn send_message(
        &self,
        message: SendMessageRequest,
        timeout: Duration,
    ) -> SyncResult<SendAck> {
        let ack_id = self.next_ack_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.acks.lock().await.insert(ack_id, tx);

        if let Err(error) = self.emit(ClientRequest::SendMessage { ack_id, message }).await {
            self.acks.lock().await.remove(&ack_id);
            return Err(error);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(ack)) => Ok(ack),
            Ok(Err(_)) => Err(SyncError::Disconnected),
            Err(_) => {
                self.acks.lock().await.remove(&ack_id);
                Err(SyncError::AckTimeout)
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
