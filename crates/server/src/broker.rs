//! Live fan-out: which connection sits in which room and which user owns it.
//!
//! All membership lives behind one lock. Delivery never waits on a slow
//! socket: each connection has a bounded queue and events that do not fit are
//! dropped, leaving the pull path to fill the hole.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use server_api::{Audience, Outbound};
use shared::{
    domain::{RoomId, UserId},
    protocol::ServerEvent,
};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ConnectionId(pub(crate) u64);

struct Connection {
    tx: mpsc::Sender<ServerEvent>,
    room: Option<RoomId>,
    user: Option<UserId>,
}

#[derive(Default)]
struct BrokerState {
    connections: HashMap<ConnectionId, Connection>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
    users: HashMap<UserId, HashSet<ConnectionId>>,
}

impl BrokerState {
    fn audience(&self, audience: Audience) -> HashSet<ConnectionId> {
        let members = match audience {
            Audience::Room(room) => self.rooms.get(&room),
            Audience::User(user) => self.users.get(&user),
        };
        members.cloned().unwrap_or_default()
    }

    fn deliver(&self, targets: impl IntoIterator<Item = ConnectionId>, event: &ServerEvent) {
        for id in targets {
            let Some(connection) = self.connections.get(&id) else {
                continue;
            };
            match connection.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(connection = id.0, "outbound queue full, dropping live event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(connection = id.0, "connection closed before delivery");
                }
            }
        }
    }

    fn leave_room(&mut self, id: ConnectionId, room: RoomId) {
        if let Some(members) = self.rooms.get_mut(&room) {
            members.remove(&id);
            if members.is_empty() {
                self.rooms.remove(&room);
            }
        }
    }

    fn unregister_user(&mut self, id: ConnectionId, user: UserId) {
        if let Some(connections) = self.users.get_mut(&user) {
            connections.remove(&id);
            if connections.is_empty() {
                self.users.remove(&user);
            }
        }
    }
}

#[derive(Clone)]
pub(crate) struct Broker {
    state: Arc<Mutex<BrokerState>>,
    next_id: Arc<AtomicU64>,
    buffer: usize,
}

impl Broker {
    pub(crate) fn new(buffer: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            next_id: Arc::new(AtomicU64::new(1)),
            buffer: buffer.max(1),
        }
    }

    pub(crate) async fn connect(&self) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.buffer);
        self.state.lock().await.connections.insert(
            id,
            Connection {
                tx,
                room: None,
                user: None,
            },
        );
        debug!(connection = id.0, "connection opened");
        (id, rx)
    }

    /// Subscribes the connection to the user's channel. Re-registering as a
    /// different user moves it.
    pub(crate) async fn register_user(&self, id: ConnectionId, user: UserId) {
        let mut state = self.state.lock().await;
        let Some(connection) = state.connections.get_mut(&id) else {
            return;
        };
        let previous = connection.user.replace(user);
        if let Some(previous) = previous.filter(|previous| *previous != user) {
            state.unregister_user(id, previous);
        }
        state.users.entry(user).or_default().insert(id);
        debug!(connection = id.0, user = user.0, "user registered");
    }

    /// Moves the connection into `room`, leaving its previous room. Returns
    /// the room it left, if any.
    pub(crate) async fn join_room(
        &self,
        id: ConnectionId,
        room: RoomId,
        user: Option<UserId>,
    ) -> Option<RoomId> {
        if let Some(user) = user {
            self.register_user(id, user).await;
        }
        let mut state = self.state.lock().await;
        let connection = state.connections.get_mut(&id)?;
        let previous = connection.room.replace(room);
        if let Some(previous) = previous.filter(|previous| *previous != room) {
            state.leave_room(id, previous);
        }
        state.rooms.entry(room).or_default().insert(id);
        debug!(connection = id.0, room = %room, "joined room");
        previous
    }

    #[cfg(test)]
    pub(crate) async fn current_room(&self, id: ConnectionId) -> Option<RoomId> {
        self.state
            .lock()
            .await
            .connections
            .get(&id)
            .and_then(|connection| connection.room)
    }

    /// Drops every trace of the connection. A registered user's departure is
    /// announced to the room it was in.
    pub(crate) async fn disconnect(&self, id: ConnectionId) {
        let mut state = self.state.lock().await;
        let Some(connection) = state.connections.remove(&id) else {
            return;
        };
        if let Some(user) = connection.user {
            state.unregister_user(id, user);
        }
        if let Some(room) = connection.room {
            state.leave_room(id, room);
            if let Some(user) = connection.user {
                let targets = state.audience(Audience::Room(room));
                state.deliver(targets, &ServerEvent::UserLeft { user_id: user });
            }
        }
        debug!(connection = id.0, "connection closed");
    }

    pub(crate) async fn broadcast_room(
        &self,
        room: RoomId,
        event: &ServerEvent,
        except: Option<ConnectionId>,
    ) {
        let state = self.state.lock().await;
        let targets = state
            .audience(Audience::Room(room))
            .into_iter()
            .filter(|id| Some(*id) != except);
        state.deliver(targets, event);
    }

    pub(crate) async fn send_to(&self, id: ConnectionId, event: ServerEvent) {
        self.state.lock().await.deliver([id], &event);
    }

    /// Delivers a batch of outbound events. A connection reached through
    /// several audiences for the same event gets it once.
    pub(crate) async fn publish(&self, outbound: &[Outbound]) {
        let state = self.state.lock().await;
        let mut batches: Vec<(&ServerEvent, HashSet<ConnectionId>)> = Vec::new();
        for item in outbound {
            let targets = state.audience(item.audience);
            match batches.iter_mut().find(|(event, _)| **event == item.event) {
                Some((_, existing)) => existing.extend(targets),
                None => batches.push((&item.event, targets)),
            }
        }
        for (event, targets) in batches {
            state.deliver(targets, event);
        }
    }

    #[cfg(test)]
    pub(crate) async fn user_connection_count(&self, user: UserId) -> usize {
        self.state
            .lock()
            .await
            .users
            .get(&user)
            .map_or(0, HashSet::len)
    }

    #[cfg(test)]
    pub(crate) async fn room_size(&self, room: RoomId) -> usize {
        self.state
            .lock()
            .await
            .rooms
            .get(&room)
            .map_or(0, HashSet::len)
    }
}

#[cfg(test)]
#[path = "tests/broker_tests.rs"]
mod tests;
