//! The local view of one room: stored messages in identity order followed by
//! local sends that the server has not yet echoed back. A local send leaves
//! its slot once its stored row arrives and takes the row's identity position.
//!
//! Everything here is synchronous. The session feeds live pushes, fetch
//! results and send outcomes through these methods so that ordering and
//! dedup are decided in one place.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use shared::{
    domain::{ClientToken, MessageId, RoomId, UserId},
    protocol::MessagePayload,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalStatus {
    Pending,
    /// The server assigned an identity but the stored row has not arrived yet.
    Confirmed(MessageId),
    Failed,
}

/// An optimistic entry for a send made from this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMessage {
    pub client_token: ClientToken,
    pub user: String,
    pub text: String,
    pub time: String,
    pub status: LocalStatus,
    /// Durable write attempts made so far, starting at 1.
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Stored(MessagePayload),
    Local(LocalMessage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveOutcome {
    /// Belongs to another room, or is not meant for this viewer.
    Dropped,
    /// Identity already present.
    Duplicate,
    /// Replaced the local entry carrying this token.
    Resolved(ClientToken),
    Inserted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveApplied {
    pub outcome: LiveOutcome,
    /// The identity jumped past `last_seen_id + 1`; a full resync is due.
    pub gap: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub received: usize,
    pub inserted: usize,
    pub pruned: usize,
    pub resolved: Vec<(ClientToken, MessageId)>,
}

impl MergeReport {
    pub fn changed(&self) -> bool {
        self.inserted > 0 || self.pruned > 0 || !self.resolved.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Timeline {
    room: RoomId,
    viewer: UserId,
    messages: Vec<MessagePayload>,
    local: Vec<LocalMessage>,
    last_seen_id: i64,
    scheduled_notices: HashSet<MessageId>,
}

impl Timeline {
    pub fn new(room: RoomId, viewer: UserId) -> Self {
        Self {
            room,
            viewer,
            messages: Vec::new(),
            local: Vec::new(),
            last_seen_id: 0,
            scheduled_notices: HashSet::new(),
        }
    }

    pub fn last_seen_id(&self) -> i64 {
        self.last_seen_id
    }

    pub fn messages(&self) -> &[MessagePayload] {
        &self.messages
    }

    pub fn local(&self) -> &[LocalMessage] {
        &self.local
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.position(id).is_ok()
    }

    /// Stored messages by identity, then local entries in the order they were
    /// sent.
    pub fn entries(&self) -> Vec<Entry> {
        self.messages
            .iter()
            .cloned()
            .map(Entry::Stored)
            .chain(self.local.iter().cloned().map(Entry::Local))
            .collect()
    }

    pub fn push_local(&mut self, message: LocalMessage) {
        self.local.push(message);
    }

    pub fn apply_live(&mut self, message: MessagePayload, now: DateTime<Utc>) -> LiveApplied {
        if message.room_id != self.room {
            return LiveApplied {
                outcome: LiveOutcome::Dropped,
                gap: false,
            };
        }

        let id = message.id.0;
        let gap = self.last_seen_id > 0 && id > self.last_seen_id + 1;
        self.last_seen_id = self.last_seen_id.max(id);

        let outcome = if !message.visible_to(self.viewer) || message.is_expired_notice(now) {
            LiveOutcome::Dropped
        } else if self.contains(message.id) {
            LiveOutcome::Duplicate
        } else {
            match self.take_local(message.client_token.as_ref()) {
                Some(token) => {
                    self.insert(message);
                    LiveOutcome::Resolved(token)
                }
                None => {
                    self.insert(message);
                    LiveOutcome::Inserted
                }
            }
        };

        LiveApplied { outcome, gap }
    }

    /// Merges an incremental fetch. Existing entries are kept and the cursor
    /// advances to the newest identity seen.
    pub fn merge_fetch(&mut self, fetched: Vec<MessagePayload>, now: DateTime<Utc>) -> MergeReport {
        self.merge(fetched, now, true)
    }

    /// Merges rows learned outside the cursor's sequence, such as a send
    /// response or a ledger drain. The cursor stays put: rows between it and
    /// these identities may still be unseen.
    pub fn merge_observed(
        &mut self,
        observed: Vec<MessagePayload>,
        now: DateTime<Utc>,
    ) -> MergeReport {
        self.merge(observed, now, false)
    }

    /// Merges a `sinceId=0` fetch. Stored messages the server no longer
    /// returns are pruned, up to the newest identity in the response; anything
    /// newer may have arrived live after the server answered.
    pub fn merge_full(&mut self, fetched: Vec<MessagePayload>, now: DateTime<Utc>) -> MergeReport {
        let newest = fetched
            .iter()
            .filter(|message| message.room_id == self.room)
            .map(|message| message.id)
            .max();
        let returned: HashSet<MessageId> = fetched
            .iter()
            .filter(|message| message.visible_to(self.viewer) && !message.is_expired_notice(now))
            .map(|message| message.id)
            .collect();

        let mut report = self.merge_fetch(fetched, now);
        if let Some(newest) = newest {
            let before = self.messages.len();
            self.messages
                .retain(|message| message.id > newest || returned.contains(&message.id));
            report.pruned = before - self.messages.len();
        }
        report
    }

    /// Records a server-assigned identity for a local send. Returns false when
    /// no local entry carries the token.
    pub fn confirm(&mut self, token: &ClientToken, id: MessageId) -> bool {
        let Some(index) = self.local_index(token) else {
            return false;
        };
        if self.contains(id) {
            self.local.remove(index);
        } else {
            self.local[index].status = LocalStatus::Confirmed(id);
        }
        true
    }

    /// Notes that the durable write for `token` is on its `attempt`th try.
    pub fn record_attempt(&mut self, token: &ClientToken, attempt: u32) -> bool {
        match self.local_index(token) {
            Some(index) if self.local[index].status == LocalStatus::Pending => {
                let local = &mut self.local[index];
                local.attempts = local.attempts.max(attempt);
                true
            }
            _ => false,
        }
    }

    /// Marks a still-pending local send as failed.
    pub fn fail(&mut self, token: &ClientToken) -> bool {
        match self.local_index(token) {
            Some(index) if self.local[index].status == LocalStatus::Pending => {
                self.local[index].status = LocalStatus::Failed;
                true
            }
            _ => false,
        }
    }

    pub fn expire(&mut self, id: MessageId) -> bool {
        self.scheduled_notices.remove(&id);
        match self.position(id) {
            Ok(index) => {
                self.messages.remove(index);
                true
            }
            Err(_) => false,
        }
    }

    /// Ephemeral notices observed since the last call, with their creation
    /// time. Each notice is reported once.
    pub fn take_new_notices(&mut self) -> Vec<(MessageId, DateTime<Utc>)> {
        let mut fresh = Vec::new();
        for message in &self.messages {
            if message.is_ephemeral_notice() && self.scheduled_notices.insert(message.id) {
                fresh.push((message.id, message.timestamp));
            }
        }
        fresh
    }

    fn merge(&mut self, fetched: Vec<MessagePayload>, now: DateTime<Utc>, advance: bool) -> MergeReport {
        let mut report = MergeReport {
            received: fetched.len(),
            ..MergeReport::default()
        };
        for message in fetched {
            if message.room_id != self.room {
                continue;
            }
            if advance {
                self.last_seen_id = self.last_seen_id.max(message.id.0);
            }
            if !message.visible_to(self.viewer)
                || message.is_expired_notice(now)
                || self.contains(message.id)
            {
                continue;
            }
            if let Some(token) = self.take_local(message.client_token.as_ref()) {
                report.resolved.push((token, message.id));
            }
            self.insert(message);
            report.inserted += 1;
        }
        report
    }

    fn position(&self, id: MessageId) -> Result<usize, usize> {
        self.messages.binary_search_by_key(&id, |message| message.id)
    }

    fn insert(&mut self, message: MessagePayload) {
        if let Err(index) = self.position(message.id) {
            self.messages.insert(index, message);
        }
    }

    fn local_index(&self, token: &ClientToken) -> Option<usize> {
        self.local
            .iter()
            .position(|local| &local.client_token == token)
    }

    fn take_local(&mut self, token: Option<&ClientToken>) -> Option<ClientToken> {
        let index = self.local_index(token?)?;
        Some(self.local.remove(index).client_token)
    }
}

#[cfg(test)]
#[path = "tests/timeline_tests.rs"]
mod tests;
