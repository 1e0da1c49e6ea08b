use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::{
    domain::{
        ChatRequestId, ChatRequestStatus, ClientToken, HeartId, MessageId, PrivateRoomId, RoomId,
        UserId, PRIVATE_ROOM_PREFIX, SYSTEM_AUTHOR,
    },
    ephemeral,
};

pub const HEART_LIST_LIMIT: i64 = 20;
pub const PENDING_REQUEST_LIMIT: i64 = 20;

const MESSAGE_SELECT: &str = "SELECT m.id, m.room_id, m.user_id, m.author, m.text, m.time,
        m.target_user_id, m.client_token, m.created_at, u.avatar
     FROM messages m
     LEFT JOIN users u ON u.id = m.user_id";

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub author_id: Option<UserId>,
    pub author: String,
    pub text: String,
    pub time: String,
    pub avatar: Option<String>,
    pub target_user_id: Option<UserId>,
    pub client_token: Option<ClientToken>,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn is_ephemeral_notice(&self) -> bool {
        ephemeral::is_ephemeral_notice(self.author_id, &self.author, &self.text)
    }

    pub fn is_expired_notice(&self, now: DateTime<Utc>) -> bool {
        self.is_ephemeral_notice() && ephemeral::is_expired(Some(self.created_at), now)
    }
}

/// Fields of a message about to be appended; `id` is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub room_id: RoomId,
    pub author_id: Option<UserId>,
    pub author: &'a str,
    pub text: &'a str,
    pub time: &'a str,
    pub target_user_id: Option<UserId>,
    pub client_token: Option<&'a ClientToken>,
    pub created_at: DateTime<Utc>,
}

/// Result of an idempotent append. A replayed client token yields the row that
/// was stored the first time, untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted(StoredMessage),
    Existing(StoredMessage),
}

impl AppendOutcome {
    pub fn message(&self) -> &StoredMessage {
        match self {
            AppendOutcome::Inserted(message) | AppendOutcome::Existing(message) => message,
        }
    }

    pub fn into_message(self) -> StoredMessage {
        match self {
            AppendOutcome::Inserted(message) | AppendOutcome::Existing(message) => message,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, AppendOutcome::Existing(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateRoom {
    pub id: PrivateRoomId,
    pub user1_id: UserId,
    pub user2_id: UserId,
    pub is_active: bool,
}

impl PrivateRoom {
    pub fn has_member(&self, user_id: UserId) -> bool {
        self.user1_id == user_id || self.user2_id == user_id
    }

    /// The other participant, or `None` when `user_id` is not a member.
    pub fn peer_of(&self, user_id: UserId) -> Option<UserId> {
        if self.user1_id == user_id {
            Some(self.user2_id)
        } else if self.user2_id == user_id {
            Some(self.user1_id)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChatRequest {
    pub id: ChatRequestId,
    pub requester_id: UserId,
    pub requested_id: UserId,
    pub status: ChatRequestStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PendingChatRequest {
    pub request: StoredChatRequest,
    pub requester_username: String,
    pub requester_avatar: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoredHeart {
    pub id: HeartId,
    pub sender_id: UserId,
    pub sender_username: String,
    pub sender_avatar: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_user(&self, username: &str, avatar: Option<&str>) -> Result<UserId> {
        let rec = sqlx::query(
            "INSERT INTO users (username, avatar) VALUES (?, ?)
             ON CONFLICT(username) DO UPDATE SET avatar = COALESCE(excluded.avatar, users.avatar)
             RETURNING id",
        )
        .bind(username)
        .bind(avatar)
        .fetch_one(&self.pool)
        .await?;
        Ok(UserId(rec.get::<i64, _>(0)))
    }

    pub async fn username_for_user(&self, user_id: UserId) -> Result<Option<String>> {
        let row = sqlx::query("SELECT username FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    pub async fn user_profile(&self, user_id: UserId) -> Result<Option<(String, Option<String>)>> {
        let row = sqlx::query("SELECT username, avatar FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| (r.get::<String, _>(0), r.get::<Option<String>, _>(1))))
    }

    /// Appends a message, or returns the row already stored under the same
    /// `(room, client_token)` pair. Token-less messages always insert.
    pub async fn append_message(&self, message: NewMessage<'_>) -> Result<AppendOutcome> {
        let room = message.room_id.to_string();
        let token = message.client_token.map(ClientToken::as_str);
        let inserted = sqlx::query(
            "INSERT INTO messages
                (room_id, user_id, author, text, time, target_user_id, client_token, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(room_id, client_token) DO NOTHING
             RETURNING id",
        )
        .bind(room.as_str())
        .bind(message.author_id.map(|id| id.0))
        .bind(message.author)
        .bind(message.text)
        .bind(message.time)
        .bind(message.target_user_id.map(|id| id.0))
        .bind(token)
        .bind(message.created_at)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to append message to room {room}"))?;

        if let Some(row) = inserted {
            let id = MessageId(row.get::<i64, _>(0));
            let stored = self
                .message(id)
                .await?
                .ok_or_else(|| anyhow!("message {} vanished after insert", id.0))?;
            return Ok(AppendOutcome::Inserted(stored));
        }

        let token = message
            .client_token
            .ok_or_else(|| anyhow!("insert into room {room} was ignored without a client token"))?;
        let existing = self
            .find_by_client_token(message.room_id, token)
            .await?
            .ok_or_else(|| anyhow!("conflicting message for token {token} not found"))?;
        Ok(AppendOutcome::Existing(existing))
    }

    pub async fn message(&self, id: MessageId) -> Result<Option<StoredMessage>> {
        let sql = format!("{MESSAGE_SELECT} WHERE m.id = ?");
        let row = sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    pub async fn find_by_client_token(
        &self,
        room_id: RoomId,
        token: &ClientToken,
    ) -> Result<Option<StoredMessage>> {
        let sql = format!("{MESSAGE_SELECT} WHERE m.room_id = ? AND m.client_token = ?");
        let row = sqlx::query(&sql)
            .bind(room_id.to_string())
            .bind(token.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    /// Messages in `room_id` with id above `since`, oldest first. With a
    /// viewer, messages targeted at someone else are left out. Expired
    /// ephemeral notices are never returned.
    pub async fn list_room_messages(
        &self,
        room_id: RoomId,
        since: MessageId,
        viewer: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<Vec<StoredMessage>> {
        let sql = format!(
            "{MESSAGE_SELECT}
             WHERE m.room_id = ? AND m.id > ?
               AND (? IS NULL OR m.target_user_id IS NULL OR m.target_user_id = ?)
             ORDER BY m.id ASC"
        );
        let viewer = viewer.map(|id| id.0);
        let rows = sqlx::query(&sql)
            .bind(room_id.to_string())
            .bind(since.0)
            .bind(viewer)
            .bind(viewer)
            .fetch_all(&self.pool)
            .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            let message = message_from_row(row)?;
            if !message.is_expired_notice(now) {
                messages.push(message);
            }
        }
        Ok(messages)
    }

    /// Most recent system notice in `room_id` with the same body and target
    /// that is still inside its visibility window.
    pub async fn live_system_notice(
        &self,
        room_id: RoomId,
        text: &str,
        target_user_id: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<Option<StoredMessage>> {
        let sql = format!(
            "{MESSAGE_SELECT}
             WHERE m.room_id = ? AND m.user_id IS NULL AND m.author = ? AND m.text = ?
               AND m.target_user_id IS ?
             ORDER BY m.id DESC
             LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(room_id.to_string())
            .bind(SYSTEM_AUTHOR)
            .bind(text)
            .bind(target_user_id.map(|id| id.0))
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let message = message_from_row(&row)?;
        Ok((!message.is_expired_notice(now)).then_some(message))
    }

    /// Opens one ledger entry per recipient. Existing entries are left as
    /// they are, so a replay never reopens a delivered message.
    pub async fn record_pending_deliveries(
        &self,
        message_id: MessageId,
        recipients: &[UserId],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for recipient in recipients {
            sqlx::query(
                "INSERT OR IGNORE INTO message_deliveries (message_id, user_id, delivered_at)
                 VALUES (?, ?, NULL)",
            )
            .bind(message_id.0)
            .bind(recipient.0)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn mark_delivered(
        &self,
        message_id: MessageId,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE message_deliveries SET delivered_at = ?
             WHERE message_id = ? AND user_id = ? AND delivered_at IS NULL",
        )
        .bind(at)
        .bind(message_id.0)
        .bind(user_id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Marks the given entries delivered and returns how many were still
    /// open. Unknown ids and already-delivered entries are skipped.
    pub async fn mark_delivered_many(
        &self,
        user_id: UserId,
        message_ids: &[MessageId],
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut count = 0;
        for message_id in message_ids {
            let result = sqlx::query(
                "UPDATE message_deliveries SET delivered_at = ?
                 WHERE message_id = ? AND user_id = ? AND delivered_at IS NULL",
            )
            .bind(at)
            .bind(message_id.0)
            .bind(user_id.0)
            .execute(&mut *tx)
            .await?;
            count += result.rows_affected();
        }
        tx.commit().await?;
        Ok(count)
    }

    /// Open ledger entries for `user_id` in private rooms, oldest first.
    /// Entries for expired ephemeral notices are closed on the way out
    /// instead of being returned.
    pub async fn undelivered_for(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<StoredMessage>> {
        let sql = format!(
            "{MESSAGE_SELECT}
             INNER JOIN message_deliveries d ON d.message_id = m.id
             WHERE d.user_id = ? AND d.delivered_at IS NULL AND m.room_id LIKE ?
             ORDER BY m.id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.0)
            .bind(format!("{PRIVATE_ROOM_PREFIX}%"))
            .fetch_all(&self.pool)
            .await?;

        let mut pending = Vec::with_capacity(rows.len());
        let mut expired = Vec::new();
        for row in &rows {
            let message = message_from_row(row)?;
            if message.is_expired_notice(now) {
                expired.push(message.id);
            } else {
                pending.push(message);
            }
        }
        if !expired.is_empty() {
            self.mark_delivered_many(user_id, &expired, now).await?;
        }
        Ok(pending)
    }

    pub async fn private_room(&self, room_id: PrivateRoomId) -> Result<Option<PrivateRoom>> {
        let row = sqlx::query(
            "SELECT id, user1_id, user2_id, is_active FROM private_chat_rooms WHERE id = ?",
        )
        .bind(room_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(private_room_from_row))
    }

    pub async fn active_private_room_between(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<PrivateRoom>> {
        let (low, high) = ordered_pair(a, b);
        let row = sqlx::query(
            "SELECT id, user1_id, user2_id, is_active FROM private_chat_rooms
             WHERE user_low = ? AND user_high = ? AND is_active = 1",
        )
        .bind(low.0)
        .bind(high.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(private_room_from_row))
    }

    /// Returns the active room for the unordered pair, creating it when
    /// missing. Concurrent callers converge on the same room.
    pub async fn get_or_create_private_room(
        &self,
        a: UserId,
        b: UserId,
        now: DateTime<Utc>,
    ) -> Result<PrivateRoom> {
        if let Some(room) = self.active_private_room_between(a, b).await? {
            return Ok(room);
        }
        let (low, high) = ordered_pair(a, b);
        sqlx::query(
            "INSERT OR IGNORE INTO private_chat_rooms
                (user1_id, user2_id, user_low, user_high, is_active, created_at)
             VALUES (?, ?, ?, ?, 1, ?)",
        )
        .bind(a.0)
        .bind(b.0)
        .bind(low.0)
        .bind(high.0)
        .bind(now)
        .execute(&self.pool)
        .await?;
        self.active_private_room_between(a, b)
            .await?
            .ok_or_else(|| anyhow!("private room for {} and {} not created", a.0, b.0))
    }

    pub async fn chat_request(&self, id: ChatRequestId) -> Result<Option<StoredChatRequest>> {
        let row = sqlx::query(
            "SELECT id, requester_id, requested_id, status, created_at
             FROM private_chat_requests WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(chat_request_from_row))
    }

    /// Any request between the pair, in either direction.
    pub async fn chat_request_between(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<StoredChatRequest>> {
        let row = sqlx::query(
            "SELECT id, requester_id, requested_id, status, created_at
             FROM private_chat_requests
             WHERE (requester_id = ? AND requested_id = ?)
                OR (requester_id = ? AND requested_id = ?)
             ORDER BY updated_at DESC
             LIMIT 1",
        )
        .bind(a.0)
        .bind(b.0)
        .bind(b.0)
        .bind(a.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(chat_request_from_row))
    }

    pub async fn insert_chat_request(
        &self,
        requester: UserId,
        requested: UserId,
        now: DateTime<Utc>,
    ) -> Result<ChatRequestId> {
        let rec = sqlx::query(
            "INSERT INTO private_chat_requests
                (requester_id, requested_id, status, created_at, updated_at)
             VALUES (?, ?, 'pending', ?, ?)
             ON CONFLICT(requester_id, requested_id)
                DO UPDATE SET status = 'pending', updated_at = excluded.updated_at
             RETURNING id",
        )
        .bind(requester.0)
        .bind(requested.0)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(ChatRequestId(rec.get::<i64, _>(0)))
    }

    /// Puts a settled request back to pending with `requester` as the new
    /// asking side.
    pub async fn reset_chat_request(
        &self,
        id: ChatRequestId,
        requester: UserId,
        requested: UserId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE private_chat_requests
             SET requester_id = ?, requested_id = ?, status = 'pending', created_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(requester.0)
        .bind(requested.0)
        .bind(now)
        .bind(now)
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_chat_request_status(
        &self,
        id: ChatRequestId,
        status: ChatRequestStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE private_chat_requests SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn pending_chat_requests_for(
        &self,
        user_id: UserId,
    ) -> Result<Vec<PendingChatRequest>> {
        let rows = sqlx::query(
            "SELECT r.id, r.requester_id, r.requested_id, r.status, r.created_at,
                    u.username, u.avatar
             FROM private_chat_requests r
             LEFT JOIN users u ON u.id = r.requester_id
             WHERE r.requested_id = ? AND r.status = 'pending'
             ORDER BY r.created_at DESC
             LIMIT ?",
        )
        .bind(user_id.0)
        .bind(PENDING_REQUEST_LIMIT)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| PendingChatRequest {
                request: chat_request_from_row(r),
                requester_username: r
                    .get::<Option<String>, _>(5)
                    .unwrap_or_else(|| format!("user {}", r.get::<i64, _>(1))),
                requester_avatar: r.get::<Option<String>, _>(6),
            })
            .collect())
    }

    /// Records a heart, refreshing an existing one from the same sender back
    /// to unread.
    pub async fn upsert_heart(
        &self,
        sender: UserId,
        receiver: UserId,
        now: DateTime<Utc>,
    ) -> Result<HeartId> {
        let rec = sqlx::query(
            "INSERT INTO heart_notifications (sender_id, receiver_id, created_at, is_read)
             VALUES (?, ?, ?, 0)
             ON CONFLICT(sender_id, receiver_id)
                DO UPDATE SET created_at = excluded.created_at, is_read = 0
             RETURNING id",
        )
        .bind(sender.0)
        .bind(receiver.0)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(HeartId(rec.get::<i64, _>(0)))
    }

    pub async fn list_hearts(&self, receiver: UserId) -> Result<Vec<StoredHeart>> {
        let rows = sqlx::query(
            "SELECT h.id, h.sender_id, u.username, u.avatar, h.is_read, h.created_at
             FROM heart_notifications h
             LEFT JOIN users u ON u.id = h.sender_id
             WHERE h.receiver_id = ?
             ORDER BY h.created_at DESC
             LIMIT ?",
        )
        .bind(receiver.0)
        .bind(HEART_LIST_LIMIT)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| StoredHeart {
                id: HeartId(r.get::<i64, _>(0)),
                sender_id: UserId(r.get::<i64, _>(1)),
                sender_username: r
                    .get::<Option<String>, _>(2)
                    .unwrap_or_else(|| format!("user {}", r.get::<i64, _>(1))),
                sender_avatar: r.get::<Option<String>, _>(3),
                is_read: r.get::<bool, _>(4),
                created_at: r.get::<DateTime<Utc>, _>(5),
            })
            .collect())
    }

    pub async fn mark_hearts_read(&self, receiver: UserId) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE heart_notifications SET is_read = 1 WHERE receiver_id = ? AND is_read = 0",
        )
        .bind(receiver.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn clear_hearts(&self, receiver: UserId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM heart_notifications WHERE receiver_id = ?")
            .bind(receiver.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn ordered_pair(a: UserId, b: UserId) -> (UserId, UserId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn message_from_row(r: &SqliteRow) -> Result<StoredMessage> {
    let raw_room = r.get::<String, _>(1);
    let room_id =
        RoomId::parse(&raw_room).ok_or_else(|| anyhow!("stored room id {raw_room} is invalid"))?;
    Ok(StoredMessage {
        id: MessageId(r.get::<i64, _>(0)),
        room_id,
        author_id: r.get::<Option<i64>, _>(2).map(UserId),
        author: r.get::<String, _>(3),
        text: r.get::<String, _>(4),
        time: r.get::<String, _>(5),
        target_user_id: r.get::<Option<i64>, _>(6).map(UserId),
        client_token: r.get::<Option<String>, _>(7).map(ClientToken),
        created_at: r.get::<DateTime<Utc>, _>(8),
        avatar: r.get::<Option<String>, _>(9),
    })
}

fn private_room_from_row(r: &SqliteRow) -> PrivateRoom {
    PrivateRoom {
        id: PrivateRoomId(r.get::<i64, _>(0)),
        user1_id: UserId(r.get::<i64, _>(1)),
        user2_id: UserId(r.get::<i64, _>(2)),
        is_active: r.get::<bool, _>(3),
    }
}

fn chat_request_from_row(r: &SqliteRow) -> StoredChatRequest {
    StoredChatRequest {
        id: ChatRequestId(r.get::<i64, _>(0)),
        requester_id: UserId(r.get::<i64, _>(1)),
        requested_id: UserId(r.get::<i64, _>(2)),
        status: ChatRequestStatus::from_db(&r.get::<String, _>(3)),
        created_at: r.get::<DateTime<Utc>, _>(4),
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
