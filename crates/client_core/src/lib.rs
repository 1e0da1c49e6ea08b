use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};

use chrono::{Local, Utc};
use shared::{
    domain::{ClientToken, MessageId, RoomId, UserId},
    ephemeral,
    protocol::{ClientRequest, MessagePayload, SendAck, SendMessageRequest, ServerEvent},
    validation::validate_message_text,
};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

pub mod error;
pub mod pending;
pub mod timeline;
pub mod transport;

pub use error::{SyncError, SyncResult};
use pending::{PendingSends, SendPath};
use timeline::{LiveOutcome, LocalMessage, LocalStatus, MergeReport, Timeline};
pub use timeline::Entry;
pub use transport::{
    HttpTransport, LiveLink, LiveSignal, ReconnectPolicy, SyncTransport, WsLiveChannel,
};

/// Timing knobs for one room session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub poll_interval: Duration,
    pub full_resync_interval: Duration,
    pub ack_timeout: Duration,
    pub retry_backoff: Duration,
    /// Durable retries after the first attempt.
    pub max_retries: u32,
    pub remote_typing_ttl: Duration,
    pub local_typing_idle: Duration,
    /// Consecutive empty incremental fetches before a full resync.
    pub empty_delta_limit: u32,
    pub reconnect_delay: Duration,
    pub reconnect_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            full_resync_interval: Duration::from_secs(30),
            ack_timeout: Duration::from_secs(4),
            retry_backoff: Duration::from_secs(4),
            max_retries: 2,
            remote_typing_ttl: Duration::from_secs(3),
            local_typing_idle: Duration::from_secs(1),
            empty_delta_limit: 3,
            reconnect_delay: Duration::from_secs(1),
            reconnect_attempts: 5,
        }
    }
}

/// Floor for the poll period; a zero interval cannot drive a timer.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

impl SyncConfig {
    pub fn poll_period(&self) -> Duration {
        self.poll_interval.max(MIN_POLL_INTERVAL)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            delay: self.reconnect_delay,
            max_attempts: self.reconnect_attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The timeline changed; read it with [`RoomSession::snapshot`].
    TimelineChanged,
    MessageConfirmed {
        client_token: ClientToken,
        id: MessageId,
    },
    MessageFailed {
        client_token: ClientToken,
        reason: String,
    },
    NoticeExpired(MessageId),
    TypingChanged(Vec<String>),
    ConnectionChanged(bool),
    /// Live events the session does not consume itself, such as hearts and
    /// private chat notifications.
    Server(ServerEvent),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchKind {
    Full,
    Incremental,
}

enum Trigger {
    Tick,
    Live(LiveSignal),
    Visibility(bool),
    ResyncRequested,
    Fetched {
        kind: FetchKind,
        result: SyncResult<Vec<MessagePayload>>,
    },
    Drained(SyncResult<Vec<MessagePayload>>),
    Confirmed {
        token: ClientToken,
        path: SendPath,
        id: MessageId,
        message: Option<MessagePayload>,
    },
    Failed {
        token: ClientToken,
        reason: String,
    },
    Retrying {
        token: ClientToken,
        attempt: u32,
    },
    NoticeDue(MessageId),
    TypingExpired {
        user_id: UserId,
        generation: u64,
    },
}

struct RemoteTyping {
    username: String,
    generation: u64,
    timer: JoinHandle<()>,
}

struct SessionState {
    timeline: Timeline,
    pending: PendingSends,
    visible: bool,
    last_sync: Option<Instant>,
    last_full_sync: Option<Instant>,
    last_activity: Instant,
    empty_deltas: u32,
    full_in_flight: bool,
    full_queued: bool,
    incremental_in_flight: bool,
    drain_in_flight: bool,
    typing: HashMap<UserId, RemoteTyping>,
    typing_generation: u64,
    local_typing: Option<JoinHandle<()>>,
    notice_timers: HashMap<MessageId, JoinHandle<()>>,
}

/// Keeps one room's timeline converged with the server.
///
/// A single driver task consumes live pushes, poll ticks, visibility changes
/// and the results of background fetches and sends, and applies each of them
/// to the [`Timeline`] in arrival order. The driver holds the session weakly
/// and stops once the last handle is dropped.
pub struct RoomSession {
    config: SyncConfig,
    identity: Identity,
    room: RoomId,
    transport: Arc<dyn SyncTransport>,
    live: Arc<dyn LiveLink>,
    owned_channel: Option<Arc<WsLiveChannel>>,
    triggers: mpsc::UnboundedSender<Trigger>,
    state: Mutex<SessionState>,
    events: broadcast::Sender<ClientEvent>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl RoomSession {
    /// Connects to a server over HTTP and websocket and enters `room`.
    pub async fn connect(
        server_url: &str,
        identity: Identity,
        room: RoomId,
        config: SyncConfig,
    ) -> SyncResult<Arc<Self>> {
        let transport = Arc::new(HttpTransport::new(server_url)?);
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let channel = WsLiveChannel::connect(
            transport.server_url(),
            identity.user_id,
            config.reconnect_policy(),
            signals_tx,
        )
        .await?;
        let live: Arc<dyn LiveLink> = channel.clone();
        Ok(Self::start(config, identity, room, transport, live, Some(channel), signals_rx).await)
    }

    /// Enters `room` over caller-supplied transports.
    pub async fn enter(
        config: SyncConfig,
        identity: Identity,
        room: RoomId,
        transport: Arc<dyn SyncTransport>,
        live: Arc<dyn LiveLink>,
        live_signals: mpsc::UnboundedReceiver<LiveSignal>,
    ) -> Arc<Self> {
        Self::start(config, identity, room, transport, live, None, live_signals).await
    }

    async fn start(
        config: SyncConfig,
        identity: Identity,
        room: RoomId,
        transport: Arc<dyn SyncTransport>,
        live: Arc<dyn LiveLink>,
        owned_channel: Option<Arc<WsLiveChannel>>,
        live_signals: mpsc::UnboundedReceiver<LiveSignal>,
    ) -> Arc<Self> {
        let (triggers, trigger_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(256);
        let session = Arc::new(Self {
            state: Mutex::new(SessionState {
                timeline: Timeline::new(room, identity.user_id),
                pending: PendingSends::new(),
                visible: true,
                last_sync: None,
                last_full_sync: None,
                last_activity: Instant::now(),
                empty_deltas: 0,
                full_in_flight: false,
                full_queued: false,
                incremental_in_flight: false,
                drain_in_flight: false,
                typing: HashMap::new(),
                typing_generation: 0,
                local_typing: None,
                notice_timers: HashMap::new(),
            }),
            config,
            identity,
            room,
            transport,
            live,
            owned_channel,
            triggers,
            events,
            driver: Mutex::new(None),
        });
        let driver = tokio::spawn(Self::run(Arc::downgrade(&session), trigger_rx, live_signals));
        *session.driver.lock().await = Some(driver);
        session
    }

    pub fn room(&self) -> RoomId {
        self.room
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> Vec<Entry> {
        self.state.lock().await.timeline.entries()
    }

    pub async fn last_seen_id(&self) -> i64 {
        self.state.lock().await.timeline.last_seen_id()
    }

    pub async fn pending_sends(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn typing_users(&self) -> Vec<String> {
        typing_names(&self.state.lock().await.typing)
    }

    /// Foreground visibility. Polling pauses while hidden.
    pub fn set_visible(&self, visible: bool) {
        let _ = self.triggers.send(Trigger::Visibility(visible));
    }

    pub fn resync(&self) {
        let _ = self.triggers.send(Trigger::ResyncRequested);
    }

    /// Sends a message over both paths at once and returns its client token.
    /// The outcome arrives as [`ClientEvent::MessageConfirmed`] or
    /// [`ClientEvent::MessageFailed`].
    pub async fn send(&self, text: &str) -> SyncResult<ClientToken> {
        let text = validate_message_text(text).map_err(SyncError::Invalid)?;
        let token = ClientToken::generate(self.identity.user_id);
        let time = Local::now().format("%H:%M").to_string();
        let request = SendMessageRequest {
            room_id: self.room.to_string(),
            user_id: self.identity.user_id.0,
            user: Some(self.identity.username.clone()),
            text: text.clone(),
            time: Some(time.clone()),
            client_token: Some(token.clone()),
        };

        self.stop_typing().await;

        {
            let mut state = self.state.lock().await;
            state.timeline.push_local(LocalMessage {
                client_token: token.clone(),
                user: self.identity.username.clone(),
                text,
                time,
                status: LocalStatus::Pending,
                attempts: 1,
            });
            state.pending.begin(token.clone());

            if self.live.is_connected() {
                tokio::spawn(live_send(
                    Arc::clone(&self.live),
                    request.clone(),
                    self.config.ack_timeout,
                    self.triggers.clone(),
                ));
            }
            // Outlives the session: leave() does not cancel a send in retry.
            let durable = tokio::spawn(durable_send(
                Arc::clone(&self.transport),
                request,
                self.config.max_retries,
                self.config.retry_backoff,
                self.triggers.clone(),
            ));
            state.pending.attach_retry(&token, durable);
        }

        info!(room = %self.room, token = %token, "message queued");
        self.emit(ClientEvent::TimelineChanged);
        Ok(token)
    }

    /// Reports the composer's contents. Typing stops after a short idle
    /// period or when the draft is cleared.
    pub async fn input_changed(&self, draft: &str) {
        if draft.trim().is_empty() {
            self.stop_typing().await;
            return;
        }

        let start = ClientRequest::TypingStart {
            room_id: self.room.to_string(),
            user_id: self.identity.user_id.0,
            username: self.identity.username.clone(),
        };
        if let Err(error) = self.live.emit(start).await {
            debug!(%error, "typing start not sent");
        }

        let live = Arc::clone(&self.live);
        let stop = self.typing_stop_request();
        let idle = self.config.local_typing_idle;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            let _ = live.emit(stop).await;
        });
        let mut state = self.state.lock().await;
        if let Some(previous) = state.local_typing.replace(timer) {
            previous.abort();
        }
    }

    /// Stops syncing this room. Typing and expiry timers are cancelled;
    /// durable sends still in flight run to completion.
    pub async fn leave(&self) {
        if let Some(driver) = self.driver.lock().await.take() {
            driver.abort();
        }
        self.stop_typing().await;
        {
            let mut state = self.state.lock().await;
            for (_, typing) in state.typing.drain() {
                typing.timer.abort();
            }
            for (_, timer) in state.notice_timers.drain() {
                timer.abort();
            }
        }
        if let Some(channel) = &self.owned_channel {
            channel.close().await;
        }
        info!(room = %self.room, "left room");
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn typing_stop_request(&self) -> ClientRequest {
        ClientRequest::TypingStop {
            room_id: self.room.to_string(),
            user_id: self.identity.user_id.0,
        }
    }

    /// Emits a typing stop only while a typing start is still live; the idle
    /// timer sends its own stop when it fires.
    async fn stop_typing(&self) {
        let Some(timer) = self.state.lock().await.local_typing.take() else {
            return;
        };
        if timer.is_finished() {
            return;
        }
        timer.abort();
        if let Err(error) = self.live.emit(self.typing_stop_request()).await {
            debug!(%error, "typing stop not sent");
        }
    }

    async fn run(
        session: Weak<Self>,
        mut triggers: mpsc::UnboundedReceiver<Trigger>,
        mut live: mpsc::UnboundedReceiver<LiveSignal>,
    ) {
        let period = {
            let Some(this) = session.upgrade() else {
                return;
            };
            this.enter_room().await;
            this.config.poll_period()
        };
        let mut poll = tokio::time::interval_at(Instant::now() + period, period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut live_open = true;

        loop {
            let trigger = tokio::select! {
                Some(trigger) = triggers.recv() => trigger,
                signal = live.recv(), if live_open => match signal {
                    Some(signal) => Trigger::Live(signal),
                    None => {
                        live_open = false;
                        continue;
                    }
                },
                _ = poll.tick() => Trigger::Tick,
            };
            let Some(this) = session.upgrade() else {
                debug!("session dropped, driver stopping");
                return;
            };
            this.handle(trigger).await;
        }
    }

    async fn enter_room(&self) {
        info!(room = %self.room, user = self.identity.user_id.0, "entering room");
        if self.live.is_connected() {
            self.join_live().await;
        }
        let mut state = self.state.lock().await;
        self.start_fetch(&mut state, FetchKind::Full);
        if self.room.is_private() {
            self.start_drain(&mut state);
        }
    }

    async fn handle(&self, trigger: Trigger) {
        match trigger {
            Trigger::Tick => self.on_tick().await,
            Trigger::Live(signal) => self.on_live(signal).await,
            Trigger::Visibility(visible) => self.on_visibility(visible).await,
            Trigger::ResyncRequested => {
                let mut state = self.state.lock().await;
                self.start_fetch(&mut state, FetchKind::Full);
            }
            Trigger::Fetched { kind, result } => self.on_fetched(kind, result).await,
            Trigger::Drained(result) => self.on_drained(result).await,
            Trigger::Confirmed {
                token,
                path,
                id,
                message,
            } => self.on_confirmed(token, path, id, message).await,
            Trigger::Failed { token, reason } => self.on_failed(token, reason).await,
            Trigger::Retrying { token, attempt } => {
                let changed = self.state.lock().await.timeline.record_attempt(&token, attempt);
                if changed {
                    self.emit(ClientEvent::TimelineChanged);
                }
            }
            Trigger::NoticeDue(id) => {
                let expired = {
                    let mut state = self.state.lock().await;
                    state.notice_timers.remove(&id);
                    state.timeline.expire(id)
                };
                if expired {
                    debug!(id = id.0, "notice expired");
                    self.emit(ClientEvent::NoticeExpired(id));
                    self.emit(ClientEvent::TimelineChanged);
                }
            }
            Trigger::TypingExpired {
                user_id,
                generation,
            } => {
                let names = {
                    let mut state = self.state.lock().await;
                    let current = state.typing.get(&user_id).map(|t| t.generation);
                    if current == Some(generation) {
                        state.typing.remove(&user_id);
                        Some(typing_names(&state.typing))
                    } else {
                        None
                    }
                };
                if let Some(names) = names {
                    self.emit(ClientEvent::TypingChanged(names));
                }
            }
        }
    }

    async fn on_tick(&self) {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let full_due = !state.full_in_flight
            && state
                .last_full_sync
                .map_or(true, |at| now - at >= self.config.full_resync_interval);
        if full_due {
            self.start_fetch(&mut state, FetchKind::Full);
        }
        if !state.visible {
            return;
        }
        if !full_due {
            let period = self.config.poll_period();
            let stale = state.last_sync.map_or(true, |at| now - at > period);
            let quiet = now - state.last_activity > period;
            if !state.pending.is_empty() || !self.live.is_connected() || stale || quiet {
                self.start_fetch(&mut state, FetchKind::Incremental);
            }
        }
        if self.room.is_private() {
            self.start_drain(&mut state);
        }
    }

    async fn on_visibility(&self, visible: bool) {
        let mut state = self.state.lock().await;
        let regained = visible && !state.visible;
        state.visible = visible;
        if !regained {
            return;
        }
        debug!(room = %self.room, "visibility regained");
        self.start_fetch(&mut state, FetchKind::Full);
        if self.room.is_private() {
            self.start_drain(&mut state);
        }
    }

    async fn join_live(&self) {
        let register = ClientRequest::RegisterUser {
            user_id: self.identity.user_id.0,
        };
        let join = ClientRequest::JoinRoom {
            room_id: self.room.to_string(),
            user_id: Some(self.identity.user_id.0),
        };
        for request in [register, join] {
            if let Err(error) = self.live.emit(request).await {
                debug!(%error, "live join not sent");
            }
        }
    }

    async fn on_live(&self, signal: LiveSignal) {
        match signal {
            LiveSignal::Connected { resumed } => {
                info!(room = %self.room, resumed, "live channel up");
                self.emit(ClientEvent::ConnectionChanged(true));
                self.join_live().await;
                let mut state = self.state.lock().await;
                self.start_fetch(&mut state, FetchKind::Incremental);
                if self.room.is_private() {
                    self.start_drain(&mut state);
                }
            }
            LiveSignal::Disconnected => {
                self.emit(ClientEvent::ConnectionChanged(false));
            }
            LiveSignal::GaveUp => {
                warn!(room = %self.room, "live channel unavailable, relying on polling");
                self.emit(ClientEvent::Error("live channel unavailable".into()));
            }
            LiveSignal::Event(event) => self.on_server_event(event).await,
        }
    }

    async fn on_server_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::ReceiveMessage { message } => self.on_live_message(message).await,
            ServerEvent::UserTyping { user_id, username } => {
                if user_id == self.identity.user_id {
                    return;
                }
                let names = {
                    let mut state = self.state.lock().await;
                    state.typing_generation += 1;
                    let generation = state.typing_generation;
                    let triggers = self.triggers.clone();
                    let ttl = self.config.remote_typing_ttl;
                    let timer = tokio::spawn(async move {
                        tokio::time::sleep(ttl).await;
                        let _ = triggers.send(Trigger::TypingExpired {
                            user_id,
                            generation,
                        });
                    });
                    let entry = RemoteTyping {
                        username,
                        generation,
                        timer,
                    };
                    if let Some(previous) = state.typing.insert(user_id, entry) {
                        previous.timer.abort();
                    }
                    typing_names(&state.typing)
                };
                self.emit(ClientEvent::TypingChanged(names));
            }
            ServerEvent::UserStoppedTyping { user_id } => self.clear_typing(user_id).await,
            ServerEvent::UserLeft { user_id } => {
                self.clear_typing(user_id).await;
                self.emit(ClientEvent::Server(ServerEvent::UserLeft { user_id }));
            }
            ServerEvent::SendMessageAck { ack_id, .. } => {
                debug!(ack_id, "uncorrelated send ack");
            }
            ServerEvent::Error(error) => self.emit(ClientEvent::Error(error.message)),
            other => self.emit(ClientEvent::Server(other)),
        }
    }

    async fn clear_typing(&self, user_id: UserId) {
        let names = {
            let mut state = self.state.lock().await;
            let Some(typing) = state.typing.remove(&user_id) else {
                return;
            };
            typing.timer.abort();
            typing_names(&state.typing)
        };
        self.emit(ClientEvent::TypingChanged(names));
    }

    async fn on_live_message(&self, message: MessagePayload) {
        let id = message.id;
        let in_room = message.room_id == self.room;
        let mut confirmed = None;
        let changed;
        {
            let mut state = self.state.lock().await;
            state.last_activity = Instant::now();
            let last_seen = state.timeline.last_seen_id();
            let applied = state.timeline.apply_live(message, Utc::now());
            changed = match applied.outcome {
                LiveOutcome::Resolved(token) => {
                    if state.pending.confirm(&token, SendPath::Echo) {
                        confirmed = Some(token);
                    }
                    true
                }
                LiveOutcome::Inserted => true,
                LiveOutcome::Duplicate | LiveOutcome::Dropped => false,
            };
            if applied.gap {
                info!(room = %self.room, last_seen, id = id.0, "identity gap, full resync");
                self.start_fetch(&mut state, FetchKind::Full);
            }
            self.schedule_notices(&mut state);
        }

        if let Some(client_token) = confirmed {
            self.emit(ClientEvent::MessageConfirmed { client_token, id });
        }
        if changed {
            self.emit(ClientEvent::TimelineChanged);
        }
        if in_room && self.room.is_private() {
            self.spawn_ack(vec![id]);
        }
    }

    fn start_fetch(&self, state: &mut SessionState, kind: FetchKind) {
        match kind {
            FetchKind::Full => {
                if state.full_in_flight {
                    if !state.full_queued {
                        debug!(room = %self.room, "full resync coalesced");
                    }
                    state.full_queued = true;
                    return;
                }
                state.full_in_flight = true;
            }
            FetchKind::Incremental => {
                if state.full_in_flight || state.incremental_in_flight {
                    return;
                }
                state.incremental_in_flight = true;
            }
        }

        let since_id = match kind {
            FetchKind::Full => 0,
            FetchKind::Incremental => state.timeline.last_seen_id(),
        };
        let transport = Arc::clone(&self.transport);
        let triggers = self.triggers.clone();
        let room = self.room;
        let viewer = self.identity.user_id;
        tokio::spawn(async move {
            let result = transport.fetch_messages(room, since_id, viewer).await;
            let _ = triggers.send(Trigger::Fetched { kind, result });
        });
    }

    fn start_drain(&self, state: &mut SessionState) {
        if state.drain_in_flight {
            return;
        }
        state.drain_in_flight = true;
        let transport = Arc::clone(&self.transport);
        let triggers = self.triggers.clone();
        let user = self.identity.user_id;
        tokio::spawn(async move {
            let result = transport.fetch_undelivered(user).await;
            let _ = triggers.send(Trigger::Drained(result));
        });
    }

    fn spawn_ack(&self, ids: Vec<MessageId>) {
        let transport = Arc::clone(&self.transport);
        let user = self.identity.user_id;
        tokio::spawn(async move {
            if let Err(error) = transport.ack(user, &ids).await {
                debug!(%error, count = ids.len(), "delivery ack failed");
            }
        });
    }

    async fn on_fetched(&self, kind: FetchKind, result: SyncResult<Vec<MessagePayload>>) {
        let mut state = self.state.lock().await;
        match kind {
            FetchKind::Full => state.full_in_flight = false,
            FetchKind::Incremental => state.incremental_in_flight = false,
        }

        match result {
            Ok(messages) => {
                let received = messages.len();
                let now = Instant::now();
                let report = match kind {
                    FetchKind::Full => state.timeline.merge_full(messages, Utc::now()),
                    FetchKind::Incremental => state.timeline.merge_fetch(messages, Utc::now()),
                };
                state.last_sync = Some(now);
                match kind {
                    FetchKind::Full => {
                        state.last_full_sync = Some(now);
                        state.empty_deltas = 0;
                    }
                    FetchKind::Incremental if received == 0 => state.empty_deltas += 1,
                    FetchKind::Incremental => state.empty_deltas = 0,
                }
                debug!(
                    room = %self.room,
                    ?kind,
                    received,
                    inserted = report.inserted,
                    pruned = report.pruned,
                    last_seen = state.timeline.last_seen_id(),
                    "fetch merged"
                );
                self.settle_echoes(&mut state, &report);
                self.schedule_notices(&mut state);
                if kind == FetchKind::Incremental
                    && state.empty_deltas >= self.config.empty_delta_limit
                {
                    state.empty_deltas = 0;
                    debug!(room = %self.room, "quiet room, escalating to full resync");
                    self.start_fetch(&mut state, FetchKind::Full);
                }
                if report.changed() {
                    self.emit(ClientEvent::TimelineChanged);
                }
            }
            Err(error) => warn!(room = %self.room, ?kind, %error, "message fetch failed"),
        }

        if kind == FetchKind::Full && state.full_queued {
            state.full_queued = false;
            self.start_fetch(&mut state, FetchKind::Full);
        }
    }

    async fn on_drained(&self, result: SyncResult<Vec<MessagePayload>>) {
        let messages = {
            let mut state = self.state.lock().await;
            state.drain_in_flight = false;
            match result {
                Ok(messages) => messages,
                Err(error) => {
                    warn!(user = self.identity.user_id.0, %error, "undelivered drain failed");
                    return;
                }
            }
        };
        if messages.is_empty() {
            return;
        }

        let ids: Vec<MessageId> = messages.iter().map(|message| message.id).collect();
        let report = {
            let mut state = self.state.lock().await;
            state.last_activity = Instant::now();
            let report = state.timeline.merge_observed(messages, Utc::now());
            self.settle_echoes(&mut state, &report);
            self.schedule_notices(&mut state);
            report
        };
        info!(
            user = self.identity.user_id.0,
            count = ids.len(),
            merged = report.inserted,
            "drained undelivered messages"
        );
        if report.changed() {
            self.emit(ClientEvent::TimelineChanged);
        }
        self.spawn_ack(ids);
    }

    async fn on_confirmed(
        &self,
        token: ClientToken,
        path: SendPath,
        id: MessageId,
        message: Option<MessagePayload>,
    ) {
        let (first, changed) = {
            let mut state = self.state.lock().await;
            let first = state.pending.confirm(&token, path);
            let changed = match message {
                Some(message) => state
                    .timeline
                    .merge_observed(vec![message], Utc::now())
                    .changed(),
                None => state.timeline.confirm(&token, id),
            };
            (first, changed)
        };
        if first {
            info!(room = %self.room, token = %token, id = id.0, ?path, "message confirmed");
            self.emit(ClientEvent::MessageConfirmed {
                client_token: token,
                id,
            });
        }
        if changed {
            self.emit(ClientEvent::TimelineChanged);
        }
    }

    async fn on_failed(&self, token: ClientToken, reason: String) {
        {
            let mut state = self.state.lock().await;
            if !state.pending.fail(&token) {
                return;
            }
            state.timeline.fail(&token);
            self.start_fetch(&mut state, FetchKind::Incremental);
        }
        warn!(room = %self.room, token = %token, %reason, "message failed to sync");
        self.emit(ClientEvent::MessageFailed {
            client_token: token,
            reason,
        });
        self.emit(ClientEvent::TimelineChanged);
    }

    fn settle_echoes(&self, state: &mut SessionState, report: &MergeReport) {
        for (token, id) in &report.resolved {
            if state.pending.confirm(token, SendPath::Echo) {
                self.emit(ClientEvent::MessageConfirmed {
                    client_token: token.clone(),
                    id: *id,
                });
            }
        }
    }

    fn schedule_notices(&self, state: &mut SessionState) {
        let now = Utc::now();
        for (id, created_at) in state.timeline.take_new_notices() {
            let remaining = ephemeral::remaining(created_at, now);
            if remaining.is_zero() {
                state.timeline.expire(id);
                self.emit(ClientEvent::NoticeExpired(id));
                continue;
            }
            let triggers = self.triggers.clone();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(remaining).await;
                let _ = triggers.send(Trigger::NoticeDue(id));
            });
            if let Some(previous) = state.notice_timers.insert(id, timer) {
                previous.abort();
            }
        }
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.get_mut().take() {
            driver.abort();
        }
        let state = self.state.get_mut();
        for (_, typing) in state.typing.drain() {
            typing.timer.abort();
        }
        for (_, timer) in state.notice_timers.drain() {
            timer.abort();
        }
    }
}

fn typing_names(typing: &HashMap<UserId, RemoteTyping>) -> Vec<String> {
    let mut names: Vec<String> = typing.values().map(|t| t.username.clone()).collect();
    names.sort();
    names
}

async fn live_send(
    live: Arc<dyn LiveLink>,
    request: SendMessageRequest,
    timeout: Duration,
    triggers: mpsc::UnboundedSender<Trigger>,
) {
    let Some(token) = request.client_token.clone() else {
        return;
    };
    match live.send_message(request, timeout).await {
        Ok(SendAck {
            ok: true,
            id: Some(id),
            client_token,
            ..
        }) if client_token.as_ref() == Some(&token) => {
            let _ = triggers.send(Trigger::Confirmed {
                token,
                path: SendPath::Live,
                id,
                message: None,
            });
        }
        Ok(ack) => debug!(token = %token, error = ?ack.error, "live send not confirmed"),
        Err(error) => debug!(token = %token, %error, "live send unavailable"),
    }
}

async fn durable_send(
    transport: Arc<dyn SyncTransport>,
    request: SendMessageRequest,
    max_retries: u32,
    backoff: Duration,
    triggers: mpsc::UnboundedSender<Trigger>,
) {
    let Some(token) = request.client_token.clone() else {
        return;
    };
    let mut retries = 0;
    loop {
        match transport.post_message(&request).await {
            Ok(message) => {
                let _ = triggers.send(Trigger::Confirmed {
                    token,
                    path: SendPath::Durable,
                    id: message.id,
                    message: Some(message),
                });
                return;
            }
            Err(error) if error.is_transient() && retries < max_retries => {
                retries += 1;
                warn!(token = %token, %error, retries, "durable send failed, retrying");
                tokio::time::sleep(backoff).await;
                let _ = triggers.send(Trigger::Retrying {
                    token: token.clone(),
                    attempt: retries + 1,
                });
            }
            Err(error) => {
                let _ = triggers.send(Trigger::Failed {
                    token,
                    reason: error.to_string(),
                });
                return;
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
