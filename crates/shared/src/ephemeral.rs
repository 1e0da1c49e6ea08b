//! Rules for short-lived chat-request notices.
//!
//! A notice is system-authored and its body falls into one of two fixed
//! categories. It stays visible for [`EPHEMERAL_TTL_SECS`] after creation and
//! is hidden from every read path afterwards; rows are never deleted.

use chrono::{DateTime, Duration, Utc};

use crate::domain::{UserId, SYSTEM_AUTHOR};

pub const EPHEMERAL_TTL_SECS: i64 = 120;

const REQUEST_SENT_MARKER: &str = "sent you a chat request";
const REQUEST_ACCEPTED_MARKER: &str = "accepted your chat request";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    ChatRequestSent,
    ChatRequestAccepted,
}

impl NoticeKind {
    /// Renders the notice body around the acting user's display name.
    pub fn render(self, actor: &str) -> String {
        match self {
            NoticeKind::ChatRequestSent => format!("{actor} {REQUEST_SENT_MARKER}."),
            NoticeKind::ChatRequestAccepted => format!("{actor} {REQUEST_ACCEPTED_MARKER}."),
        }
    }

    pub fn classify(text: &str) -> Option<Self> {
        if text.contains(REQUEST_SENT_MARKER) {
            Some(NoticeKind::ChatRequestSent)
        } else if text.contains(REQUEST_ACCEPTED_MARKER) {
            Some(NoticeKind::ChatRequestAccepted)
        } else {
            None
        }
    }
}

pub fn ttl() -> Duration {
    Duration::seconds(EPHEMERAL_TTL_SECS)
}

pub fn is_ephemeral_notice(author_id: Option<UserId>, author: &str, text: &str) -> bool {
    author_id.is_none() && author == SYSTEM_AUTHOR && NoticeKind::classify(text).is_some()
}

/// Expiry is strict: a notice exactly `ttl` old is still visible. A notice
/// without a creation time is treated as expired.
pub fn is_expired(created_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match created_at {
        Some(created_at) => now - created_at > ttl(),
        None => true,
    }
}

/// Time left before the notice disappears, zero once it is past due.
pub fn remaining(created_at: DateTime<Utc>, now: DateTime<Utc>) -> std::time::Duration {
    let elapsed = (now - created_at).max(Duration::zero());
    (ttl() - elapsed)
        .to_std()
        .unwrap_or(std::time::Duration::ZERO)
}
